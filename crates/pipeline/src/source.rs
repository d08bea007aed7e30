//! Where jobs come from.
//!
//! A [`JobSource`] hands out [`Delivery`] values: a raw descriptor body
//! plus the handle that acknowledges it. [`drain`] feeds a source through a
//! [`JobPipeline`] strictly one job at a time.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::job::JobPipeline;

/// Failed to acknowledge a delivery. Only ever logged.
#[derive(Debug, thiserror::Error)]
#[error("Failed to acknowledge delivery: {0}")]
pub struct AckError(pub String);

/// Settles one delivery. Consumed by either method, so a delivery is
/// settled at most once.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), AckError>;

    /// Give the delivery back to its source for redelivery. Sources that
    /// cannot redeliver simply drop it.
    async fn requeue(self: Box<Self>) -> Result<(), AckError> {
        Ok(())
    }
}

/// Acknowledger for sources with nothing to acknowledge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAck;

#[async_trait]
impl Acknowledger for NoAck {
    async fn ack(self: Box<Self>) -> Result<(), AckError> {
        Ok(())
    }
}

/// One job as received, not yet decoded.
pub struct Delivery {
    /// Serialized [`JobDescriptor`](scanny_core::job::JobDescriptor).
    pub body: Vec<u8>,
    pub acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(body: impl Into<Vec<u8>>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            body: body.into(),
            acker,
        }
    }

    /// A delivery whose acknowledgement does nothing.
    pub fn unacknowledged(body: impl Into<Vec<u8>>) -> Self {
        Self::new(body, Box::new(NoAck))
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// A stream of jobs.
#[async_trait]
pub trait JobSource: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait for the next delivery. `None` means the source is exhausted.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error>;
}

/// A fixed list of deliveries, e.g. descriptor files given on the command
/// line.
#[derive(Debug, Default)]
pub struct StaticSource {
    pending: VecDeque<Delivery>,
}

impl StaticSource {
    pub fn new(deliveries: impl IntoIterator<Item = Delivery>) -> Self {
        Self {
            pending: deliveries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl JobSource for StaticSource {
    type Error = std::convert::Infallible;

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error> {
        Ok(self.pending.pop_front())
    }
}

/// Counts from one [`drain`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Run every delivery of `source` through `pipeline`, one at a time, until
/// the source is exhausted or `cancel` fires. Job faults are handled (and
/// acknowledged) by the pipeline and never end the loop; only a failing
/// source does.
pub async fn drain<S: JobSource>(
    source: &mut S,
    pipeline: &JobPipeline,
    cancel: &CancellationToken,
) -> Result<DrainSummary, S::Error> {
    let mut summary = DrainSummary::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(processed = summary.processed, "Stopping job source");
                break;
            }
            next = source.next_delivery() => next?,
        };
        let Some(delivery) = next else {
            tracing::info!(processed = summary.processed, "Job source exhausted");
            break;
        };
        if pipeline.process(delivery).await.is_err() {
            summary.failed += 1;
        }
        summary.processed += 1;
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
