//! Worker plumbing: environment configuration, the AMQP job source and
//! logging setup. The `scanny-worker` binary wires these to the pipeline.

pub mod config;
pub mod consumer;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, WorkerConfig};
pub use consumer::{QueueConsumer, QueueError};
