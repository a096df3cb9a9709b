//! One source's poll cycle.
//!
//! A cycle stamps a time from the source's monotonic clock, runs the
//! device's fetch sequence, normalizes the snapshot and hands the records
//! to the sink as one batch. Any failure ends the cycle with nothing
//! emitted.

use crate::scheduler::PollTask;
use crate::sink::MetricSink;
use chrono::{DateTime, Utc};
use homestat_core::{MetricRecord, PollClock, PollError, RecordContext, SourceConfig};
use homestat_devices::{Device, DeviceAdaptor};
use homestat_proto::{CycleOutcome, CycleReport, MetricBatch};
use homestat_transport::{ClientError, DeviceClient};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Polls one source with one device adaptor.
pub struct SourcePoller<A = Device> {
    source: Arc<SourceConfig>,
    client: DeviceClient,
    device: tokio::sync::Mutex<A>,
    clock: Mutex<PollClock>,
    sink: Arc<dyn MetricSink>,
}

impl SourcePoller<Device> {
    /// Poller with the adaptor matching the source's kind.
    ///
    /// # Errors
    ///
    /// Returns error if the source's HTTP client cannot be built.
    pub fn new(source: Arc<SourceConfig>, sink: Arc<dyn MetricSink>) -> Result<Self, ClientError> {
        let device = Device::for_source(&source);
        Self::with_adaptor(source, device, sink)
    }
}

impl<A> SourcePoller<A>
where
    A: DeviceAdaptor + Send + 'static,
{
    /// Poller with an explicit adaptor.
    ///
    /// # Errors
    ///
    /// Returns error if the source's HTTP client cannot be built.
    pub fn with_adaptor(
        source: Arc<SourceConfig>,
        device: A,
        sink: Arc<dyn MetricSink>,
    ) -> Result<Self, ClientError> {
        let client = DeviceClient::new(Arc::clone(&source))?;
        Ok(Self {
            source,
            client,
            device: tokio::sync::Mutex::new(device),
            clock: Mutex::new(PollClock::new()),
            sink,
        })
    }

    /// Run one poll cycle under a fresh id and report its outcome.
    pub async fn poll_once(&self) -> CycleReport {
        self.poll_cycle(Uuid::new_v4()).await
    }

    /// Run poll cycle `cycle_id` and report its outcome.
    pub async fn poll_cycle(&self, cycle_id: Uuid) -> CycleReport {
        let started = Instant::now();
        let timestamp = self
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick();

        tracing::debug!(source = %self.source.id, cycle = %cycle_id, "Poll cycle started");

        let outcome = match self.collect(timestamp).await {
            Ok(records) => {
                let batch = MetricBatch {
                    source_id: self.source.id.clone(),
                    cycle_id,
                    timestamp,
                    records,
                };
                let count = batch.len();
                match self.sink.emit(batch) {
                    Ok(()) => CycleOutcome::Emitted { records: count },
                    Err(err) => {
                        tracing::warn!(source = %self.source.id, error = %err, kind = "sink", "Failed to emit metrics");
                        CycleOutcome::Failed {
                            kind: "sink".to_string(),
                            message: err.to_string(),
                        }
                    }
                }
            }
            Err(err) => self.failed(&err),
        };

        let report = CycleReport {
            source_id: self.source.id.clone(),
            cycle_id,
            started_at: timestamp,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
        };
        self.sink.report(&report);
        report
    }

    async fn collect(&self, timestamp: DateTime<Utc>) -> Result<Vec<MetricRecord>, PollError> {
        let mut device = self.device.lock().await;
        let snapshot = device.fetch(&self.client).await?;
        let ctx = RecordContext::new(self.source.id.clone(), timestamp);
        Ok(device.normalize(&snapshot, &ctx)?)
    }

    fn failed(&self, err: &PollError) -> CycleOutcome {
        tracing::warn!(source = %self.source.id, error = %err, kind = err.kind(), "Poll cycle failed");
        CycleOutcome::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl<A> PollTask for SourcePoller<A>
where
    A: DeviceAdaptor + Send + 'static,
{
    fn source(&self) -> &SourceConfig {
        &self.source
    }

    async fn poll(&self, cycle_id: Uuid) {
        self.poll_cycle(cycle_id).await;
    }

    fn timed_out(&self, cycle_id: Uuid, deadline: Duration) {
        let outcome = self.failed(&PollError::Timeout(deadline));
        let now = Utc::now();
        self.sink.report(&CycleReport {
            source_id: self.source.id.clone(),
            cycle_id,
            started_at: chrono::Duration::from_std(deadline).map_or(now, |d| now - d),
            duration_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            outcome,
        });
    }
}
