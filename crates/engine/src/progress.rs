//! Progress reporting port.

use scanny_core::types::Percent;

/// Receives absolute progress readings as the engine reports them.
///
/// Called inline from the status reader, so implementations must return
/// promptly and never block on I/O.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: Percent);
}

impl<F> ProgressSink for F
where
    F: Fn(Percent) + Send + Sync,
{
    fn on_progress(&self, percent: Percent) {
        self(percent)
    }
}

/// Sink that only logs readings; used by the direct `scan` command.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, percent: Percent) {
        tracing::info!(percent, "Scan progress");
    }
}
