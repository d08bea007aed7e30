//! Error types for engine launch and protocol handling.

use std::path::PathBuf;

/// The engine binary could not be started. Always fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Nothing exists at the configured engine path.
    #[error("Engine binary not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but has no execute permission.
    #[error("Engine binary is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    /// The OS refused to spawn the process.
    #[error("Failed to spawn engine {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A status line from the engine could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The line does not have the `<result> <state> <progress>` shape.
    #[error("Malformed status line: {0:?}")]
    MalformedLine(String),

    /// The result token is neither `ok` nor `fail`.
    #[error("Unknown result token {token:?} in line {line:?}")]
    UnknownResult { token: String, line: String },

    /// A progress token is not an integer percentage in `0..=100`.
    #[error("Invalid progress {token:?} in line {line:?}")]
    InvalidProgress { token: String, line: String },
}

/// Any fault that ends an engine session abnormally.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Engine protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One of the session's activities panicked or was aborted.
    #[error("Engine session task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Whether an I/O error means the engine closed its end of a pipe.
pub(crate) fn is_closed_pipe(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
