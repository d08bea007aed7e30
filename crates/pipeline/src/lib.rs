//! Job pipeline: everything a worker does around one engine scan.
//!
//! - [`progress`] turns absolute engine progress into tracker increments
//!   without blocking the engine's status reader.
//! - [`archive`] packages the engine's output directory.
//! - [`job`] runs the staged steps for one job and acknowledges it.
//! - [`source`] abstracts where jobs come from and drains a source
//!   through the pipeline one job at a time.

pub mod archive;
pub mod error;
pub mod job;
pub mod progress;
pub mod source;

pub use error::PipelineError;
pub use job::{JobPipeline, JobSummary};
pub use progress::ProgressRelay;
pub use source::{
    drain, AckError, Acknowledger, Delivery, DrainSummary, JobSource, NoAck, StaticSource,
};
