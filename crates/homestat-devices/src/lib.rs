//! # homestat devices
//!
//! Device adaptors for the sources homestat knows how to poll.
//!
//! Each adaptor runs the device's request sequence (including any login
//! handshake) through a [`DeviceClient`](homestat_transport::DeviceClient)
//! and turns the captured payloads into uniform
//! [`MetricRecord`](homestat_core::MetricRecord)s:
//!
//! | Kind | API | Auth |
//! |---|---|---|
//! | [`BBox`] | JSON `/api/v1` | `BBOX_ID` session cookie |
//! | [`Freebox`] | JSON `/api/v4` | HMAC-SHA1 challenge, `X-Fbx-App-Auth` |
//! | [`Deye`] | HTML `/status.html` | HTTP Basic |
//!
//! Fetching and normalizing are separate steps so captured payloads can be
//! decoded offline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adaptor;
pub mod bbox;
mod builder;
pub mod deye;
pub mod freebox;
mod session;
mod value;

pub use adaptor::{Device, DeviceAdaptor, DeviceSnapshot};
pub use bbox::{BBox, BBoxSnapshot};
pub use deye::{Deye, DeyeSnapshot, DeyeStatus};
pub use freebox::{challenge_answer, Freebox, FreeboxSnapshot};
