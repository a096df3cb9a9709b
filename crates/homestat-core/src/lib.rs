//! # homestat core
//!
//! Shared model for the homestat polling engine.
//!
//! This crate provides:
//! - [`SourceConfig`]: one configured device (endpoint, trust anchors, window, cadence)
//! - [`SourceRegistry`]: the set of sources, unique by id
//! - [`MetricRecord`]: the normalized unit every device payload is mapped to
//! - [`PollClock`]: per-source monotonic timestamps for poll cycles
//! - The error taxonomy shared by transport, devices and the agent

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod record;
pub mod registry;
pub mod source;

pub use clock::PollClock;
pub use config::{load_sources, parse_sources};
pub use error::{ConfigError, DecodeError, PollError, RegistryError};
pub use record::{MetricRecord, MetricValue, RecordContext};
pub use registry::SourceRegistry;
pub use source::{
    ActiveWindow, Credentials, Endpoint, SourceConfig, SourceKind, TrustAnchor, TrustSettings,
};
