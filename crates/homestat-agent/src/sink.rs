//! Metric sinks.
//!
//! A sink receives at most one [`MetricBatch`] per completed poll cycle.
//! `emit` must not block: the scheduler keeps ticking while sinks work.

use homestat_proto::{CycleReport, MetricBatch, TopicScheme};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Destination of normalized metrics.
pub trait MetricSink: Send + Sync {
    /// Hand over the records of one poll cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the batch could not be accepted.
    fn emit(&self, batch: MetricBatch) -> Result<(), SinkError>;

    /// Observe the outcome of a poll cycle, successful or not.
    fn report(&self, _report: &CycleReport) {}
}

/// Writes every batch to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn emit(&self, batch: MetricBatch) -> Result<(), SinkError> {
        tracing::info!(
            source = %batch.source_id,
            cycle = %batch.cycle_id,
            records = batch.len(),
            "Metrics"
        );
        for record in &batch.records {
            tracing::debug!(
                source = %batch.source_id,
                metric = record.metric_name(),
                value = %record.value(),
                unit = record.unit().unwrap_or_default(),
                tags = ?record.tags(),
                "Metric"
            );
        }
        Ok(())
    }

    fn report(&self, report: &CycleReport) {
        tracing::debug!(
            source = %report.source_id,
            cycle = %report.cycle_id,
            duration_ms = report.duration_ms,
            success = report.is_success(),
            "Cycle finished"
        );
    }
}

/// Forwards batches to a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MetricBatch>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MetricBatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl MetricSink for ChannelSink {
    fn emit(&self, batch: MetricBatch) -> Result<(), SinkError> {
        self.tx.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Publishes CBOR batches and cycle reports to an MQTT broker.
pub struct MqttSink {
    client: AsyncClient,
    topics: TopicScheme,
}

impl MqttSink {
    /// Create a sink; the returned event loop must be polled for anything
    /// to reach the broker.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidBrokerUrl`] if the broker address is
    /// malformed.
    pub fn new(
        mqtt_broker: &str,
        client_id: &str,
        topics: TopicScheme,
    ) -> Result<(Self, EventLoop), SinkError> {
        let (host, port) = parse_mqtt_url(mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok((Self { client, topics }, eventloop))
    }
}

impl MetricSink for MqttSink {
    fn emit(&self, batch: MetricBatch) -> Result<(), SinkError> {
        let topic = self.topics.metrics(&batch.source_id);
        let payload = batch
            .to_cbor()
            .map_err(|e| SinkError::Serialize(e.to_string()))?;

        tracing::debug!(topic, payload_len = payload.len(), "Publishing metrics");

        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| SinkError::Publish(e.to_string()))
    }

    fn report(&self, report: &CycleReport) {
        let topic = self.topics.status(&report.source_id);
        let published = report
            .to_cbor()
            .map_err(|e| SinkError::Serialize(e.to_string()))
            .and_then(|payload| {
                self.client
                    .try_publish(topic, QoS::AtMostOnce, false, payload)
                    .map_err(|e| SinkError::Publish(e.to_string()))
            });
        if let Err(err) = published {
            tracing::warn!(source = %report.source_id, error = %err, "Failed to publish cycle report");
        }
    }
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), SinkError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| SinkError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(SinkError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| SinkError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        return Ok((host.to_string(), url.port().unwrap_or(1883)));
    }

    let (host, port) = match input.split_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| {
                SinkError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
            })?;
            (host, port)
        }
        None => (input, 1883),
    };
    if host.is_empty() {
        return Err(SinkError::InvalidBrokerUrl(format!("{input}: missing host")));
    }

    Ok((host.to_string(), port))
}

/// Errors for sink operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// The consumer is not keeping up
    #[error("sink is full")]
    Full,
    /// The consumer went away
    #[error("sink is closed")]
    Closed,
    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use homestat_core::MetricRecord;

    fn batch() -> MetricBatch {
        let ts = Utc::now();
        MetricBatch::new(
            "deye",
            ts,
            vec![MetricRecord::new("deye", "power_now", 312_u64, ts).with_unit("W")],
        )
    }

    #[test]
    fn mqtt_urls() {
        assert_eq!(
            parse_mqtt_url("tcp://broker.lan:1884").unwrap(),
            ("broker.lan".to_string(), 1884)
        );
        assert_eq!(
            parse_mqtt_url("mqtt://localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("10.0.0.2:1883").unwrap(),
            ("10.0.0.2".to_string(), 1883)
        );
        assert!(parse_mqtt_url("http://broker").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
        assert!(parse_mqtt_url("broker:port").is_err());
    }

    #[tokio::test]
    async fn channel_sink_delivers_and_reports_backpressure() {
        let (sink, mut rx) = ChannelSink::new(1);

        sink.emit(batch()).unwrap();
        assert!(matches!(sink.emit(batch()), Err(SinkError::Full)));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source_id, "deye");
        assert_eq!(received.len(), 1);

        drop(rx);
        assert!(matches!(sink.emit(batch()), Err(SinkError::Closed)));
    }

    #[test]
    fn log_sink_accepts_batches() {
        assert!(LogSink.emit(batch()).is_ok());
    }

    #[tokio::test]
    async fn mqtt_sink_queues_without_broker() {
        let (sink, _eventloop) =
            MqttSink::new("tcp://127.0.0.1:1", "homestat-test", TopicScheme::default()).unwrap();
        assert!(sink.emit(batch()).is_ok());
    }
}
