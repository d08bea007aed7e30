//! Test helpers: fake engines written as bash scripts.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, LaunchError};

/// `ETXTBSY`: the script is still open for writing in a process forked by
/// another test thread.
const ETXTBSY: i32 = 26;
const BUSY_ATTEMPTS: usize = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(20);

/// Write an executable bash script with `body` and return its path.
///
/// The returned directory must be kept alive for as long as the script
/// is used. Launch it through [`retry_busy`] or [`retry_busy_launch`].
pub(crate) fn fake_engine(body: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("engine.sh");
    std::fs::write(&path, format!("#!/bin/bash\n{body}")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    (dir, path)
}

pub(crate) fn is_text_busy(err: &LaunchError) -> bool {
    matches!(err, LaunchError::Spawn { source, .. } if source.raw_os_error() == Some(ETXTBSY))
}

/// Retry a synchronous launch while the script is busy.
pub(crate) fn retry_busy_launch<T>(
    mut attempt: impl FnMut() -> Result<T, LaunchError>,
) -> Result<T, LaunchError> {
    for _ in 1..BUSY_ATTEMPTS {
        match attempt() {
            Err(ref e) if is_text_busy(e) => std::thread::sleep(BUSY_BACKOFF),
            other => return other,
        }
    }
    attempt()
}

/// Retry a whole engine run while the script is busy.
pub(crate) async fn retry_busy<T, F, Fut>(mut attempt: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    for _ in 1..BUSY_ATTEMPTS {
        match attempt().await {
            Err(EngineError::Launch(ref e)) if is_text_busy(e) => {
                tokio::time::sleep(BUSY_BACKOFF).await
            }
            other => return other,
        }
    }
    attempt().await
}

#[test]
fn text_busy_is_recognised_and_retried() {
    let busy = || LaunchError::Spawn {
        binary: PathBuf::from("engine.sh"),
        source: std::io::Error::from_raw_os_error(ETXTBSY),
    };
    assert!(is_text_busy(&busy()));
    assert!(!is_text_busy(&LaunchError::NotFound(PathBuf::from("engine.sh"))));

    let mut calls = 0;
    let result = retry_busy_launch(|| {
        calls += 1;
        if calls < 3 {
            Err(busy())
        } else {
            Ok(calls)
        }
    });
    assert_eq!(result.unwrap(), 3);
}
