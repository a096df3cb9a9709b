//! # homestat agent
//!
//! Polling runtime of the homestat engine.
//!
//! ## Architecture
//!
//! The agent runs three kinds of loops:
//! 1. **Scheduler**: ticks on a fixed granularity and dispatches due sources
//! 2. **Poll cycles**: one task per dispatched source, bounded by its timeout
//! 3. **Sink**: hands normalized batches to the log or to an MQTT broker

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod poller;
pub mod runtime;
pub mod scheduler;
pub mod sink;

pub use config::{AgentConfig, SinkKind};
pub use poller::SourcePoller;
pub use runtime::Agent;
pub use scheduler::{PollTask, Scheduler, DEFAULT_TICK};
pub use sink::{ChannelSink, LogSink, MetricSink, MqttSink, SinkError};
