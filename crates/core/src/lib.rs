//! Shared domain types for the scanny worker.
//!
//! Everything here is pure data: identifiers, the job descriptor carried
//! on the work queue, the scan [`Outcome`](outcome::Outcome) and the
//! validation errors raised while accepting a descriptor.

pub mod error;
pub mod job;
pub mod outcome;
pub mod types;
