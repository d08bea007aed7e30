use scanny_core::error::CoreError;
use scanny_core::outcome::Outcome;
use scanny_engine::EngineError;
use scanny_tracker::TrackerError;

/// A fault that ends one job early.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid job descriptor: {0}")]
    Descriptor(#[from] CoreError),

    #[error("Tracker request failed while trying to {step}: {source}")]
    Tracker {
        step: &'static str,
        #[source]
        source: TrackerError,
    },

    #[error("Engine session failed: {0}")]
    Engine(#[from] EngineError),

    /// The engine ran but did not report success.
    #[error("Scan finished with outcome {0}")]
    Scan(Outcome),

    #[error("I/O error while trying to {step}: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn tracker(step: &'static str) -> impl FnOnce(TrackerError) -> Self {
        move |source| Self::Tracker { step, source }
    }

    pub(crate) fn io(step: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { step, source }
    }
}
