//! Spawning the engine process.
//!
//! [`EngineConnection`] owns the child process and its three piped
//! streams. The child is created with `kill_on_drop(true)`, so dropping a
//! connection (or a session that owns one) never leaks an engine process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::LaunchError;

/// A running engine with its command, status and diagnostics streams.
#[derive(Debug)]
pub struct EngineConnection {
    binary: PathBuf,
    child: Child,
    streams: EngineStreams,
}

/// The three engine streams, each owned by exactly one session activity.
#[derive(Debug)]
pub struct EngineStreams {
    /// Command channel (engine stdin).
    pub commands: ChildStdin,
    /// Status channel (engine stdout).
    pub status: ChildStdout,
    /// Diagnostics channel (engine stderr).
    pub diagnostics: ChildStderr,
}

impl EngineConnection {
    /// Spawn `binary` with `args`, optionally inside `working_dir`.
    pub fn spawn<I, S>(
        binary: &Path,
        args: I,
        working_dir: Option<&Path>,
    ) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        check_binary(binary)?;

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| spawn_error(binary, e))?;

        // All three are piped above, so `take` cannot come back empty.
        let (Some(commands), Some(status), Some(diagnostics)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(LaunchError::Spawn {
                binary: binary.to_path_buf(),
                source: std::io::Error::other("engine stdio was not captured"),
            });
        };

        tracing::debug!(
            binary = %binary.display(),
            pid = child.id(),
            "Engine process spawned",
        );

        Ok(Self {
            binary: binary.to_path_buf(),
            child,
            streams: EngineStreams {
                commands,
                status,
                diagnostics,
            },
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// OS process ID, or `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Split into the process handle and its streams.
    pub fn into_parts(self) -> (Child, EngineStreams) {
        (self.child, self.streams)
    }
}

/// Verify an explicit engine path before spawning.
///
/// Bare program names (no path separator) are resolved through `PATH` by
/// the OS, so only the spawn error can tell us about them.
pub(crate) fn check_binary(binary: &Path) -> Result<(), LaunchError> {
    if binary.components().count() <= 1 && !binary.is_absolute() {
        return Ok(());
    }

    let metadata =
        std::fs::metadata(binary).map_err(|_| LaunchError::NotFound(binary.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(LaunchError::NotExecutable(binary.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::NotExecutable(binary.to_path_buf()));
        }
    }

    Ok(())
}

/// Map an OS spawn failure onto the launch error taxonomy.
pub(crate) fn spawn_error(binary: &Path, err: std::io::Error) -> LaunchError {
    match err.kind() {
        std::io::ErrorKind::NotFound => LaunchError::NotFound(binary.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => LaunchError::NotExecutable(binary.to_path_buf()),
        _ => LaunchError::Spawn {
            binary: binary.to_path_buf(),
            source: err,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
