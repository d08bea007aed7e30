//! End-to-end processing of one job.
//!
//! ```text
//! decode ─► clean ─► fetch seqs ─► set-run ─► download hmm/db
//!        ─► scan (progress relayed) ─► package prod/ ─► upload ─► ack
//! ```
//!
//! Every fault is caught at [`JobPipeline::process`], logged, and followed
//! by the acknowledgement, which happens exactly once per delivery
//! whatever the result. A job that fails is therefore never redelivered.
//! The one exception is shutdown: a job cut short because the pipeline's
//! cancellation token fired is requeued instead, so another worker picks
//! it up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use scanny_core::job::JobDescriptor;
use scanny_core::outcome::Outcome;
use scanny_core::types::DbId;
use scanny_engine::{ScanEngine, ScanRequest};
use scanny_tracker::JobTracker;
use tokio_util::sync::CancellationToken;

use crate::archive::{self, PROD_ARCHIVE, PROD_DIR};
use crate::error::PipelineError;
use crate::progress::ProgressRelay;
use crate::source::Delivery;

/// File the job's sequences are written to; the engine scans it.
pub const SEQS_FILE: &str = "seqs.json";

/// Result of a job that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub scan_id: DbId,
    pub job_id: DbId,
    pub outcome: Outcome,
    /// Size of the uploaded archive.
    pub archive_bytes: u64,
}

/// Runs jobs against one tracker and one engine inside a work directory.
///
/// The engine must resolve its file arguments against the same work
/// directory (see `SessionConfig::working_dir`).
#[derive(Clone)]
pub struct JobPipeline {
    tracker: Arc<dyn JobTracker>,
    engine: Arc<dyn ScanEngine>,
    work_dir: PathBuf,
    cancel: CancellationToken,
}

impl JobPipeline {
    pub fn new(
        tracker: Arc<dyn JobTracker>,
        engine: Arc<dyn ScanEngine>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tracker,
            engine,
            work_dir: work_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel running scans when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Decode, run and acknowledge one delivery.
    pub async fn process(&self, delivery: Delivery) -> Result<JobSummary, PipelineError> {
        let Delivery { body, acker } = delivery;

        let result = match JobDescriptor::from_slice(&body) {
            Ok(job) => self.run(&job).await,
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(summary) => tracing::info!(
                scan_id = summary.scan_id,
                job_id = summary.job_id,
                archive_bytes = summary.archive_bytes,
                "Job completed"
            ),
            Err(e) => tracing::error!(error = %e, "Job failed"),
        }

        if self.interrupted_by_shutdown(&result) {
            tracing::warn!("Job interrupted by shutdown, returning it for redelivery");
            if let Err(e) = acker.requeue().await {
                tracing::warn!(error = %e, "Failed to requeue job");
            }
        } else if let Err(e) = acker.ack().await {
            tracing::warn!(error = %e, "Failed to acknowledge job");
        }
        result
    }

    /// A failed job whose descriptor was valid, while the cancellation
    /// token has fired.
    fn interrupted_by_shutdown(&self, result: &Result<JobSummary, PipelineError>) -> bool {
        self.cancel.is_cancelled()
            && matches!(result, Err(e) if !matches!(e, PipelineError::Descriptor(_)))
    }

    /// Run the job's steps without acknowledging anything.
    pub async fn run(&self, job: &JobDescriptor) -> Result<JobSummary, PipelineError> {
        job.validate()?;
        tracing::info!(
            scan_id = job.scan_id,
            job_id = job.job_id,
            hmm_file = %job.hmm_file,
            db_file = %job.db_file,
            "Starting job"
        );

        archive::remove_stale_outputs(&self.work_dir).await;

        let seqs = self
            .tracker
            .fetch_seqs(job.scan_id)
            .await
            .map_err(PipelineError::tracker("fetch the sequences"))?;
        let seqs = serde_json::to_vec(&seqs)
            .map_err(|e| PipelineError::io("encode the sequences")(e.into()))?;
        tokio::fs::write(self.work_dir.join(SEQS_FILE), seqs)
            .await
            .map_err(PipelineError::io("write the sequences"))?;

        if let Err(e) = self.tracker.set_job_running(job.job_id).await {
            tracing::warn!(job_id = job.job_id, error = %e, "Failed to mark job as running");
        }

        self.tracker
            .download_hmm(job.hmm_id, &self.work_dir.join(&job.hmm_file))
            .await
            .map_err(PipelineError::tracker("download the HMM"))?;
        tracing::info!(job_id = job.job_id, "HMM download finished");

        self.tracker
            .download_db(job.db_id, &self.work_dir.join(&job.db_file))
            .await
            .map_err(PipelineError::tracker("download the database"))?;
        tracing::info!(job_id = job.job_id, "Database download finished");

        let outcome = self.scan(job).await?;
        if !outcome.is_success() {
            return Err(PipelineError::Scan(outcome));
        }

        let archive_path = self.work_dir.join(PROD_ARCHIVE);
        let archive_bytes = archive::package_dir(self.work_dir.join(PROD_DIR), archive_path.clone())
            .await
            .map_err(PipelineError::io("package the results"))?;

        self.tracker
            .upload_prod(job.scan_id, &archive_path)
            .await
            .map_err(PipelineError::tracker("upload the results"))?;

        Ok(JobSummary {
            scan_id: job.scan_id,
            job_id: job.job_id,
            outcome,
            archive_bytes,
        })
    }

    async fn scan(&self, job: &JobDescriptor) -> Result<Outcome, PipelineError> {
        let request = ScanRequest {
            scan_file: SEQS_FILE.to_string(),
            db_file: job.db_file.clone(),
            multi_hits: job.multi_hits,
            hmmer3_compat: job.hmmer3_compat,
        };
        let relay = ProgressRelay::spawn(Arc::clone(&self.tracker), job.job_id);

        let report = self
            .engine
            .scan(&request, relay.clone(), self.cancel.clone())
            .await;
        relay.finish().await;

        let report = report?;
        tracing::info!(
            job_id = job.job_id,
            outcome = %report.outcome,
            progress = relay.last(),
            "Scan finished"
        );
        Ok(report.outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
