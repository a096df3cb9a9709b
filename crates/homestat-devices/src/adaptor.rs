//! Device capability trait and kind dispatch.

use crate::bbox::{BBox, BBoxSnapshot};
use crate::deye::{Deye, DeyeSnapshot};
use crate::freebox::{Freebox, FreeboxSnapshot};
use homestat_core::{DecodeError, MetricRecord, PollError, RecordContext, SourceConfig, SourceKind};
use homestat_transport::DeviceClient;
use std::future::Future;

/// A device that can be polled.
///
/// `fetch` performs the device-specific request sequence and returns the
/// raw payloads; `normalize` turns them into records. A payload that cannot
/// be decoded yields no record at all.
pub trait DeviceAdaptor {
    /// Raw payloads captured by one fetch.
    type Snapshot: Send;

    /// Run the request sequence, logging in first if needed.
    fn fetch(
        &mut self,
        client: &DeviceClient,
    ) -> impl Future<Output = Result<Self::Snapshot, PollError>> + Send;

    /// Decode a snapshot into records stamped by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if a payload does not have the device's shape.
    fn normalize(
        &self,
        snapshot: &Self::Snapshot,
        ctx: &RecordContext,
    ) -> Result<Vec<MetricRecord>, DecodeError>;
}

/// Adaptor selected by [`SourceKind`].
#[derive(Debug)]
pub enum Device {
    /// Bouygues BBox router
    BBox(BBox),
    /// Free Freebox router
    Freebox(Freebox),
    /// Deye solar micro-inverter
    Deye(Deye),
}

impl Device {
    /// Adaptor for a kind.
    #[must_use]
    pub fn new(kind: SourceKind, auth_required: bool) -> Self {
        match kind {
            SourceKind::BBox => Self::BBox(BBox::new(auth_required)),
            SourceKind::Freebox => Self::Freebox(Freebox::new(auth_required)),
            SourceKind::Deye => Self::Deye(Deye::new()),
        }
    }

    /// Adaptor for a configured source.
    #[must_use]
    pub fn for_source(source: &SourceConfig) -> Self {
        Self::new(source.kind, source.auth_required)
    }

    /// Kind of this adaptor.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::BBox(_) => SourceKind::BBox,
            Self::Freebox(_) => SourceKind::Freebox,
            Self::Deye(_) => SourceKind::Deye,
        }
    }
}

impl DeviceAdaptor for Device {
    type Snapshot = DeviceSnapshot;

    async fn fetch(&mut self, client: &DeviceClient) -> Result<DeviceSnapshot, PollError> {
        Ok(match self {
            Self::BBox(device) => DeviceSnapshot::BBox(device.fetch(client).await?),
            Self::Freebox(device) => DeviceSnapshot::Freebox(device.fetch(client).await?),
            Self::Deye(device) => DeviceSnapshot::Deye(device.fetch(client).await?),
        })
    }

    fn normalize(
        &self,
        snapshot: &DeviceSnapshot,
        ctx: &RecordContext,
    ) -> Result<Vec<MetricRecord>, DecodeError> {
        match (self, snapshot) {
            (Self::BBox(device), DeviceSnapshot::BBox(s)) => device.normalize(s, ctx),
            (Self::Freebox(device), DeviceSnapshot::Freebox(s)) => device.normalize(s, ctx),
            (Self::Deye(device), DeviceSnapshot::Deye(s)) => device.normalize(s, ctx),
            (device, snapshot) => Err(DecodeError::new(format!(
                "{} snapshot handed to {} adaptor",
                snapshot.kind(),
                device.kind()
            ))),
        }
    }
}

/// Snapshot of any device kind.
#[derive(Debug, Clone)]
pub enum DeviceSnapshot {
    /// BBox API responses
    BBox(BBoxSnapshot),
    /// Freebox API responses
    Freebox(FreeboxSnapshot),
    /// Deye status page
    Deye(DeyeSnapshot),
}

impl DeviceSnapshot {
    /// Build a snapshot from captured payloads, in fetch order.
    ///
    /// - BBox: one or more API responses
    /// - Freebox: `connection/`, `system/`, `switch/status/`, then one
    ///   `switch/port/{id}/stats` response per listed port
    /// - Deye: the status page (split captures are concatenated)
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payloads cannot form a snapshot.
    pub fn from_payloads(kind: SourceKind, payloads: Vec<Vec<u8>>) -> Result<Self, DecodeError> {
        Ok(match kind {
            SourceKind::BBox => Self::BBox(BBoxSnapshot::new(payloads)),
            SourceKind::Freebox => Self::Freebox(FreeboxSnapshot::from_payloads(payloads)?),
            SourceKind::Deye => Self::Deye(DeyeSnapshot::new(payloads.concat())),
        })
    }

    /// Kind of device the snapshot came from.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::BBox(_) => SourceKind::BBox,
            Self::Freebox(_) => SourceKind::Freebox,
            Self::Deye(_) => SourceKind::Deye,
        }
    }
}
