//! Fire-and-forget progress relay.
//!
//! The engine reports absolute percentages; the tracker wants increments.
//! [`ProgressRelay`] converts each strict increase into a delta and hands
//! it to a single background dispatcher through a bounded channel, so the
//! engine's status reader never waits on HTTP. When the channel is full
//! the increment is dropped and logged.

use std::sync::{Arc, Mutex};

use scanny_core::types::{DbId, Percent};
use scanny_engine::ProgressSink;
use scanny_tracker::JobTracker;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default number of increments that may wait for delivery.
pub const DEFAULT_CAPACITY: usize = 64;

/// Relays engine progress for one job to the tracker.
pub struct ProgressRelay {
    job_id: DbId,
    last: Mutex<Percent>,
    sender: Mutex<Option<mpsc::Sender<Percent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressRelay {
    /// Start a relay (and its dispatcher task) for `job_id`.
    pub fn spawn(tracker: Arc<dyn JobTracker>, job_id: DbId) -> Arc<Self> {
        Self::with_capacity(tracker, job_id, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(tracker: Arc<dyn JobTracker>, job_id: DbId, capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dispatcher = tokio::spawn(dispatch(tracker, job_id, receiver));
        Arc::new(Self {
            job_id,
            last: Mutex::new(0),
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Record an absolute reading. Never blocks.
    ///
    /// Repeats and decreases produce no increment; the baseline only moves
    /// forward.
    pub fn record(&self, percent: Percent) {
        let increment = {
            let Ok(mut last) = self.last.lock() else {
                return;
            };
            if percent <= *last {
                return;
            }
            let increment = percent - *last;
            *last = percent;
            increment
        };

        let Ok(sender) = self.sender.lock() else {
            return;
        };
        match sender.as_ref().map(|tx| tx.try_send(increment)) {
            Some(Ok(())) => {}
            Some(Err(mpsc::error::TrySendError::Full(_))) => {
                tracing::warn!(
                    job_id = self.job_id,
                    increment,
                    "Progress queue full, dropping increment"
                );
            }
            Some(Err(mpsc::error::TrySendError::Closed(_))) | None => {
                tracing::debug!(
                    job_id = self.job_id,
                    increment,
                    "Progress relay already finished"
                );
            }
        }
    }

    /// Highest reading seen so far.
    pub fn last(&self) -> Percent {
        self.last.lock().map(|p| *p).unwrap_or_default()
    }

    /// Stop accepting readings and wait until queued increments are sent.
    pub async fn finish(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let dispatcher = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::warn!(job_id = self.job_id, error = %e, "Progress dispatcher failed");
            }
        }
    }
}

impl ProgressSink for ProgressRelay {
    fn on_progress(&self, percent: Percent) {
        self.record(percent);
    }
}

async fn dispatch(tracker: Arc<dyn JobTracker>, job_id: DbId, mut receiver: mpsc::Receiver<Percent>) {
    while let Some(increment) = receiver.recv().await {
        match tracker.increment_progress(job_id, increment).await {
            Ok(()) => tracing::debug!(job_id, increment, "Progress increment sent"),
            Err(e) => tracing::warn!(
                job_id,
                increment,
                error = %e,
                "Failed to send progress increment"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use scanny_tracker::TrackerError;
    use tokio::sync::Notify;

    use super::*;

    /// Tracker that records increments and can be held up or made to fail.
    #[derive(Default)]
    struct IncrementRecorder {
        increments: Mutex<Vec<Percent>>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl JobTracker for IncrementRecorder {
        async fn fetch_seqs(&self, _: DbId) -> Result<serde_json::Value, TrackerError> {
            unreachable!()
        }
        async fn set_job_running(&self, _: DbId) -> Result<(), TrackerError> {
            unreachable!()
        }
        async fn increment_progress(&self, _: DbId, increment: Percent) -> Result<(), TrackerError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(TrackerError::Api {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.increments.lock().unwrap().push(increment);
            Ok(())
        }
        async fn download_hmm(&self, _: DbId, _: &Path) -> Result<u64, TrackerError> {
            unreachable!()
        }
        async fn download_db(&self, _: DbId, _: &Path) -> Result<u64, TrackerError> {
            unreachable!()
        }
        async fn upload_prod(&self, _: DbId, _: &Path) -> Result<serde_json::Value, TrackerError> {
            unreachable!()
        }
    }

    async fn relay_readings(readings: &[Percent]) -> Vec<Percent> {
        let tracker = Arc::new(IncrementRecorder::default());
        let relay = ProgressRelay::spawn(tracker.clone(), 1);
        for p in readings {
            relay.on_progress(*p);
        }
        relay.finish().await;
        let sent = tracker.increments.lock().unwrap().clone();
        sent
    }

    #[tokio::test]
    async fn increments_follow_strict_increases() {
        assert_eq!(relay_readings(&[10, 55, 100]).await, vec![10, 45, 45]);
    }

    #[tokio::test]
    async fn repeats_and_decreases_send_nothing() {
        assert_eq!(relay_readings(&[5, 5, 3, 5, 8]).await, vec![5, 3]);
        assert!(relay_readings(&[0, 0]).await.is_empty());
    }

    #[tokio::test]
    async fn increments_sum_to_last_reading() {
        let readings: Vec<Percent> = (0..=100).step_by(7).collect();
        let sent = relay_readings(&readings).await;
        let total: u32 = sent.iter().map(|p| u32::from(*p)).sum();
        assert_eq!(total, 98);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(Notify::new());
        let tracker = Arc::new(IncrementRecorder {
            gate: Some(gate.clone()),
            ..IncrementRecorder::default()
        });
        let relay = ProgressRelay::with_capacity(tracker.clone(), 1, 1);

        // Give the dispatcher a chance to pick up the first increment and
        // park on the gate, then overflow the single queue slot.
        relay.record(10);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        relay.record(20);
        relay.record(30);
        relay.record(40);
        assert_eq!(relay.last(), 40);

        // Release every pending call.
        let releaser = tokio::spawn(async move {
            loop {
                gate.notify_one();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });
        relay.finish().await;
        releaser.abort();

        let sent = tracker.increments.lock().unwrap().clone();
        assert_eq!(sent, vec![10, 10], "third and fourth increments were dropped");
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let tracker = Arc::new(IncrementRecorder {
            fail: true,
            ..IncrementRecorder::default()
        });
        let relay = ProgressRelay::spawn(tracker.clone(), 1);
        relay.record(50);
        relay.finish().await;
        assert!(tracker.increments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn readings_after_finish_are_ignored() {
        let tracker = Arc::new(IncrementRecorder::default());
        let relay = ProgressRelay::spawn(tracker.clone(), 1);
        relay.record(20);
        relay.finish().await;
        relay.record(60);
        assert_eq!(*tracker.increments.lock().unwrap(), vec![20]);
    }
}
