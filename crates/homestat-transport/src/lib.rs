//! # homestat transport
//!
//! HTTP(S) access to home devices.
//!
//! Each source gets its own [`DeviceClient`]:
//!
//! - **Trust**: the source's PEM trust anchors are added to (or replace) the
//!   built-in roots, since routers and inverters present vendor or
//!   self-signed certificates
//! - **Credentials**: decoded from the endpoint URL, sent only when a request
//!   asks for them
//! - **Deadline**: every request is bounded by the source timeout
//!
//! Failures are classified into the [`PollError`](homestat_core::PollError)
//! taxonomy so callers can log and move on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod encoding;
#[cfg(any(test, feature = "test-util"))]
pub mod stub;

pub use client::{ClientError, DeviceClient, RawPayload, RequestSpec};
pub use encoding::{basic_authorization, cookie_value, form_urlencode};
