//! Job descriptor published on the work queue.
//!
//! One descriptor identifies one scan request: which scan and tracker job
//! it belongs to, and which HMM and database files the engine needs. The
//! wire form is the JSON object the tracker publishes, e.g.
//!
//! ```json
//! {"id": 1, "job_id": 7, "hmm_id": 2, "hmm_file": "pfam.hmm",
//!  "db_id": 3, "db_file": "pfam.dcp"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Longest file name accepted for a staged input.
const MAX_FILE_NAME_LEN: usize = 255;

/// A scan request as received from the work queue.
///
/// Immutable once decoded; the pipeline that receives it owns it until the
/// originating message is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Tracker scan ID.
    #[serde(rename = "id")]
    pub scan_id: DbId,
    /// Tracker job ID; progress updates are addressed to it.
    pub job_id: DbId,
    pub hmm_id: DbId,
    /// Local file name the HMM is downloaded to.
    pub hmm_file: String,
    pub db_id: DbId,
    /// Local file name the database is downloaded to.
    pub db_file: String,
    /// Report multiple hits per sequence.
    #[serde(default = "default_multi_hits")]
    pub multi_hits: bool,
    /// Use HMMER3-compatible scoring.
    #[serde(default)]
    pub hmmer3_compat: bool,
}

fn default_multi_hits() -> bool {
    true
}

impl JobDescriptor {
    /// Decode a descriptor from a queue message body and validate it.
    pub fn from_slice(body: &[u8]) -> Result<Self, CoreError> {
        let descriptor: Self = serde_json::from_slice(body)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the fields that end up on the local filesystem.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_file_name(&self.hmm_file)?;
        validate_file_name(&self.db_file)?;
        Ok(())
    }
}

/// Accept only plain file names: non-empty, no path separators, no `.` or
/// `..`, no NUL. Staged inputs are written relative to the work directory,
/// so anything else could escape it.
pub fn validate_file_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "File name must be 1-{MAX_FILE_NAME_LEN} bytes, got {} bytes",
            name.len()
        )));
    }
    if name == "." || name == ".." {
        return Err(CoreError::Validation(format!(
            "File name must not be '{name}'"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(CoreError::Validation(format!(
            "File name must not contain path separators: '{name}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
