//! Client for the remote job tracker.
//!
//! The tracker owns scans, jobs and the HMM/database files. A worker only
//! needs a handful of its endpoints, exposed through the [`JobTracker`]
//! trait so the pipeline can be exercised without a live server.

pub mod api;
pub mod error;

use std::path::Path;

use async_trait::async_trait;
use scanny_core::types::{DbId, Percent};

pub use api::TrackerApi;
pub use error::TrackerError;

/// The tracker operations the job pipeline depends on.
#[async_trait]
pub trait JobTracker: Send + Sync {
    /// `GET /scans/{scan_id}/seqs`: the sequences to scan, as JSON.
    async fn fetch_seqs(&self, scan_id: DbId) -> Result<serde_json::Value, TrackerError>;

    /// `PATCH /jobs/{job_id}/set-run`.
    async fn set_job_running(&self, job_id: DbId) -> Result<(), TrackerError>;

    /// `PATCH /jobs/{job_id}/progress/increment/{increment}`.
    async fn increment_progress(&self, job_id: DbId, increment: Percent)
        -> Result<(), TrackerError>;

    /// `GET /hmms/{hmm_id}/download` into `dest`. Returns bytes written.
    async fn download_hmm(&self, hmm_id: DbId, dest: &Path) -> Result<u64, TrackerError>;

    /// `GET /dbs/{db_id}/download` into `dest`. Returns bytes written.
    async fn download_db(&self, db_id: DbId, dest: &Path) -> Result<u64, TrackerError>;

    /// `POST /scans/{scan_id}/prods/` with the packaged results.
    async fn upload_prod(
        &self,
        scan_id: DbId,
        archive: &Path,
    ) -> Result<serde_json::Value, TrackerError>;
}
