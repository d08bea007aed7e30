//! Packaging of the engine's output directory.
//!
//! The engine writes its results under `prod/` in the work directory. They
//! are shipped to the tracker as a gzip-compressed tar whose single
//! top-level entry is that directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Directory the engine writes its results into.
pub const PROD_DIR: &str = "prod";

/// Archive uploaded to the tracker.
pub const PROD_ARCHIVE: &str = "prod.tar.gz";

/// Pack `src_dir` into a `.tar.gz` at `archive`. Returns the archive size.
///
/// Runs on the blocking pool; tar and gzip are synchronous.
pub async fn package_dir(src_dir: PathBuf, archive: PathBuf) -> io::Result<u64> {
    tokio::task::spawn_blocking(move || write_tar_gz(&src_dir, &archive))
        .await
        .map_err(io::Error::other)?
}

fn write_tar_gz(src_dir: &Path, archive: &Path) -> io::Result<u64> {
    if !src_dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("output directory {} does not exist", src_dir.display()),
        ));
    }
    let top = src_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(PROD_DIR));

    let encoder = GzEncoder::new(File::create(archive)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(&top, src_dir)?;
    let file = builder.into_inner()?.finish()?;
    file.sync_all()?;

    let size = std::fs::metadata(archive)?.len();
    tracing::debug!(
        src = %src_dir.display(),
        archive = %archive.display(),
        bytes = size,
        "Output packaged"
    );
    Ok(size)
}

/// Remove the output directory and archive left by a previous job.
///
/// Best-effort: anything other than "already gone" is logged and ignored.
pub async fn remove_stale_outputs(work_dir: &Path) {
    let prod = work_dir.join(PROD_DIR);
    if let Err(e) = tokio::fs::remove_dir_all(&prod).await {
        log_cleanup_failure(&prod, e);
    }
    let archive = work_dir.join(PROD_ARCHIVE);
    if let Err(e) = tokio::fs::remove_file(&archive).await {
        log_cleanup_failure(&archive, e);
    }
}

fn log_cleanup_failure(path: &Path, err: io::Error) {
    if err.kind() == io::ErrorKind::NotFound {
        tracing::debug!(path = %path.display(), "Nothing to clean up");
    } else {
        tracing::warn!(path = %path.display(), error = %err, "Failed to remove stale output");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
