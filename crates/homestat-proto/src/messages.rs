//! Messages emitted downstream.

use chrono::{DateTime, Utc};
use homestat_core::MetricRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Records of one completed poll cycle of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    /// Source that was polled
    pub source_id: String,
    /// Poll cycle identifier
    pub cycle_id: Uuid,
    /// Poll time shared by every record
    pub timestamp: DateTime<Utc>,
    /// Normalized records
    pub records: Vec<MetricRecord>,
}

impl MetricBatch {
    /// Create a batch with a fresh cycle id.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        records: Vec<MetricRecord>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            cycle_id: Uuid::new_v4(),
            timestamp,
            records,
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch carries no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// How a poll cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Records were emitted
    Emitted {
        /// Number of records in the batch
        records: usize,
    },
    /// The cycle failed and emitted nothing
    Failed {
        /// Error kind (`timeout`, `auth`, `decode`, ...)
        kind: String,
        /// Human-readable error
        message: String,
    },
}

/// Outcome of one poll cycle, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Source that was polled
    pub source_id: String,
    /// Poll cycle identifier, equal to the batch's when records were emitted
    pub cycle_id: Uuid,
    /// Cycle start
    pub started_at: DateTime<Utc>,
    /// Wall time spent in the cycle
    pub duration_ms: u64,
    /// Result
    pub outcome: CycleOutcome,
}

impl CycleReport {
    /// Whether the cycle emitted records.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Emitted { .. })
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestat_core::MetricValue;

    #[test]
    fn metric_batch_cbor_keeps_records() {
        let ts = Utc::now();
        let records = vec![
            MetricRecord::new("deye", "power_now", 312_u64, ts)
                .with_unit("W")
                .with_tag("sn", "2106123456"),
            MetricRecord::new("deye", "yield_today", 1.7, ts).with_unit("kWh"),
        ];
        let batch = MetricBatch::new("deye", ts, records);

        let decoded = MetricBatch::from_cbor(&batch.to_cbor().unwrap()).unwrap();

        assert_eq!(decoded.cycle_id, batch.cycle_id);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.records[0].value(), &MetricValue::Unsigned(312));
        assert_eq!(decoded.records[0].tag("sn"), Some("2106123456"));
        assert_eq!(decoded.records[1].value(), &MetricValue::Float(1.7));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            MetricBatch::from_cbor(&[0xff, 0x00, 0x13]),
            Err(MessageError::Deserialize(_))
        ));
    }

    #[test]
    fn failed_report() {
        let report = CycleReport {
            source_id: "freebox".to_string(),
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 10_000,
            outcome: CycleOutcome::Failed {
                kind: "timeout".to_string(),
                message: "timed out after 10s".to_string(),
            },
        };

        let decoded = CycleReport::from_cbor(&report.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, report);
        assert!(!decoded.is_success());
    }
}
