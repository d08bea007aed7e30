//! Driver for the external scan engine.
//!
//! The engine is an opaque binary controlled over a line-oriented protocol
//! on its standard streams. This crate spawns it ([`connection`]), speaks
//! the protocol ([`messages`]), tracks the shared protocol state
//! ([`state`]) and runs the three concurrent activities of one scan
//! ([`session`]). [`runner`] puts both supported engine protocols behind
//! the [`ScanEngine`](runner::ScanEngine) seam used by the job pipeline.

pub mod connection;
pub mod error;
pub mod messages;
pub mod oneshot;
pub mod progress;
pub mod runner;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use error::EngineError;
pub use progress::ProgressSink;
pub use runner::{EngineProtocol, EngineRunner, ScanEngine, ScanRequest};
pub use session::{EngineSession, SessionConfig, SessionReport};
pub use state::ProtocolState;
