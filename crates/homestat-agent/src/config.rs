//! Agent configuration.

use crate::scheduler::DEFAULT_TICK;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Where normalized metrics go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// `tracing` log output
    Log,
    /// CBOR batches published to MQTT
    Mqtt,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent unique identifier, used for the MQTT client id
    pub agent_id: Option<Uuid>,

    /// YAML source file
    pub sources_path: PathBuf,

    /// Scheduler tick granularity
    pub tick: Duration,

    /// Metric sink
    pub sink: SinkKind,

    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Tenant segment of MQTT topics
    pub tenant: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            sources_path: PathBuf::from("./homestat.yaml"),
            tick: DEFAULT_TICK,
            sink: SinkKind::Log,
            mqtt_broker: "tcp://localhost:1883".to_string(),
            tenant: "home".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HOMESTAT_CONFIG`: source file path
    /// - `HOMESTAT_TICK_MS`: scheduler tick in milliseconds
    /// - `HOMESTAT_SINK`: "log" or "mqtt"
    /// - `HOMESTAT_MQTT_BROKER`: MQTT broker URL
    /// - `HOMESTAT_TENANT`: Tenant identifier
    /// - `HOMESTAT_AGENT_ID`: Agent UUID
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("HOMESTAT_AGENT_ID") {
            config.agent_id = Some(Uuid::parse_str(&id).context("Invalid HOMESTAT_AGENT_ID")?);
        }

        if let Some(path) = lookup("HOMESTAT_CONFIG") {
            config.sources_path = PathBuf::from(path);
        }

        if let Some(ms) = lookup("HOMESTAT_TICK_MS") {
            let ms: u64 = ms.trim().parse().context("Invalid HOMESTAT_TICK_MS")?;
            if ms == 0 {
                bail!("HOMESTAT_TICK_MS must be greater than zero");
            }
            config.tick = Duration::from_millis(ms);
        }

        if let Some(sink) = lookup("HOMESTAT_SINK") {
            config.sink = match sink.trim().to_ascii_lowercase().as_str() {
                "log" => SinkKind::Log,
                "mqtt" => SinkKind::Mqtt,
                other => bail!("Invalid HOMESTAT_SINK '{other}', expected log or mqtt"),
            };
        }

        if let Some(mqtt) = lookup("HOMESTAT_MQTT_BROKER") {
            config.mqtt_broker = mqtt;
        }

        if let Some(tenant) = lookup("HOMESTAT_TENANT") {
            config.tenant = tenant;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.sources_path, PathBuf::from("./homestat.yaml"));
        assert_eq!(config.tick, DEFAULT_TICK);
        assert_eq!(config.sink, SinkKind::Log);
        assert_eq!(config.tenant, "home");
        assert!(config.agent_id.is_none());
    }

    #[test]
    fn overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("HOMESTAT_CONFIG", "/etc/homestat/sources.yaml"),
            ("HOMESTAT_TICK_MS", "250"),
            ("HOMESTAT_SINK", "MQTT"),
            ("HOMESTAT_MQTT_BROKER", "tcp://broker.lan:1884"),
            ("HOMESTAT_TENANT", "cabin"),
            ("HOMESTAT_AGENT_ID", "6f1c2e38-57a8-4d5e-9a3f-1b2c3d4e5f60"),
        ]))
        .unwrap();

        assert_eq!(config.sources_path, PathBuf::from("/etc/homestat/sources.yaml"));
        assert_eq!(config.tick, Duration::from_millis(250));
        assert_eq!(config.sink, SinkKind::Mqtt);
        assert_eq!(config.mqtt_broker, "tcp://broker.lan:1884");
        assert_eq!(config.tenant, "cabin");
        assert!(config.agent_id.is_some());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(AgentConfig::from_lookup(lookup(&[("HOMESTAT_TICK_MS", "0")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("HOMESTAT_TICK_MS", "fast")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("HOMESTAT_SINK", "kafka")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("HOMESTAT_AGENT_ID", "agent-1")])).is_err());
    }
}
