//! Normalized metric records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value carried by a [`MetricRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Counters and gauges reported as integers
    Unsigned(u64),
    /// Fractional readings (energy yields)
    Float(f64),
    /// Textual state
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value, `None` for text.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Unsigned(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One normalized measurement.
///
/// Records are assembled by a normalizer and never modified after being
/// handed to a sink; fields are only readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    source_id: String,
    metric_name: String,
    value: MetricValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
}

impl MetricRecord {
    /// Create a record without unit or tags.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: impl Into<MetricValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            metric_name: metric_name.into(),
            value: value.into(),
            unit: None,
            timestamp,
            tags: BTreeMap::new(),
        }
    }

    /// Set the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Source that produced the record.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Canonical metric name.
    #[must_use]
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Measured value.
    #[must_use]
    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    /// Unit, if known.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Poll time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Auxiliary dimensions.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Single tag lookup.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Source id and poll time shared by every record of one poll cycle.
#[derive(Debug, Clone)]
pub struct RecordContext {
    source_id: String,
    timestamp: DateTime<Utc>,
}

impl RecordContext {
    /// Create a context for one cycle.
    #[must_use]
    pub fn new(source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp,
        }
    }

    /// Source id.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Poll time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Start a record for this cycle.
    #[must_use]
    pub fn record(&self, metric_name: &str, value: impl Into<MetricValue>) -> MetricRecord {
        MetricRecord::new(&*self.source_id, metric_name, value, self.timestamp)
    }
}
