//! MQTT topic scheme for emitted metrics.
//!
//! Topic structure: `homestat/v1/{tenant}/{source_id}/{message_type}`
//!
//! This allows:
//! - Several homes (tenants) on one broker
//! - Subscribing to a single device
//! - Separating metrics from cycle health reports

/// Protocol version for topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Topic scheme configuration.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    /// Tenant identifier
    pub tenant: String,
    /// Topic prefix (default: "homestat")
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("home")
    }
}

impl TopicScheme {
    /// Create a new topic scheme with the given tenant.
    #[must_use]
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            prefix: "homestat".to_string(),
        }
    }

    fn base(&self, source_id: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.prefix, PROTOCOL_VERSION, self.tenant, source_id
        )
    }

    /// Topic for metric batches of a source.
    #[must_use]
    pub fn metrics(&self, source_id: &str) -> String {
        format!("{}/metrics", self.base(source_id))
    }

    /// Topic for cycle reports of a source.
    #[must_use]
    pub fn status(&self, source_id: &str) -> String {
        format!("{}/status", self.base(source_id))
    }

    /// Wildcard subscription for all messages of a source.
    #[must_use]
    pub fn source_wildcard(&self, source_id: &str) -> String {
        format!("{}/#", self.base(source_id))
    }

    /// Wildcard subscription for all messages in the tenant.
    #[must_use]
    pub fn tenant_wildcard(&self) -> String {
        format!("{}/{}/{}/#", self.prefix, PROTOCOL_VERSION, self.tenant)
    }

    /// Parse a topic to extract components.
    ///
    /// Returns `(source_id, message_type)` if valid.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(String, MessageType)> {
        let expected_prefix = format!("{}/{}/{}/", self.prefix, PROTOCOL_VERSION, self.tenant);
        let remainder = topic.strip_prefix(&expected_prefix)?;

        let (source_id, kind) = remainder.split_once('/')?;
        if source_id.is_empty() {
            return None;
        }

        let msg_type = match kind {
            "metrics" => MessageType::Metrics,
            "status" => MessageType::Status,
            _ => return None,
        };

        Some((source_id.to_string(), msg_type))
    }
}

/// Message types in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Metric batch
    Metrics,
    /// Cycle report
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_generation() {
        let scheme = TopicScheme::new("maison");

        assert_eq!(scheme.metrics("bbox"), "homestat/v1/maison/bbox/metrics");
        assert_eq!(scheme.status("bbox"), "homestat/v1/maison/bbox/status");
    }

    #[test]
    fn topic_parsing() {
        let scheme = TopicScheme::new("maison");

        let (source_id, msg_type) = scheme.parse("homestat/v1/maison/deye_roof/metrics").unwrap();
        assert_eq!(source_id, "deye_roof");
        assert_eq!(msg_type, MessageType::Metrics);

        assert!(scheme.parse("homestat/v1/other/deye/metrics").is_none());
        assert!(scheme.parse("homestat/v1/maison/deye/unknown").is_none());
        assert!(scheme.parse("homestat/v1/maison//status").is_none());
    }

    #[test]
    fn wildcard_topics() {
        let scheme = TopicScheme::default();

        assert_eq!(scheme.source_wildcard("freebox"), "homestat/v1/home/freebox/#");
        assert_eq!(scheme.tenant_wildcard(), "homestat/v1/home/#");
    }
}
