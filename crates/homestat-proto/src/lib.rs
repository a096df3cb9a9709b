//! # homestat protocol
//!
//! Wire format of what the engine hands downstream and the MQTT topic scheme
//! used to publish it.
//!
//! ## Messages
//!
//! - `MetricBatch`: the records of one completed poll cycle
//! - `CycleReport`: outcome of a poll cycle, successful or not
//!
//! ## MQTT Topics
//!
//! Topic scheme: `homestat/v1/{tenant}/{source_id}/{message_type}`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod topics;

pub use messages::{CycleOutcome, CycleReport, MessageError, MetricBatch};
pub use topics::{MessageType, TopicScheme};
