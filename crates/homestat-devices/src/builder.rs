//! Record accumulation shared by the normalizers.

use homestat_core::{MetricRecord, MetricValue, RecordContext};

/// Records of one snapshot, all stamped by the same context.
pub(crate) struct RecordSet<'a> {
    ctx: &'a RecordContext,
    records: Vec<MetricRecord>,
}

impl<'a> RecordSet<'a> {
    pub(crate) fn new(ctx: &'a RecordContext) -> Self {
        Self {
            ctx,
            records: Vec::new(),
        }
    }

    /// Append a record if the device reported a value.
    pub(crate) fn push<V: Into<MetricValue>>(
        &mut self,
        name: &str,
        value: Option<V>,
        unit: Option<&str>,
        tags: &[(&str, &str)],
    ) {
        let Some(value) = value else {
            return;
        };
        let mut record = self.ctx.record(name, value);
        if let Some(unit) = unit {
            record = record.with_unit(unit);
        }
        for (key, tag) in tags {
            record = record.with_tag(*key, *tag);
        }
        self.records.push(record);
    }

    pub(crate) fn finish(self) -> Vec<MetricRecord> {
        self.records
    }
}
