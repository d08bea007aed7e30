//! The seam between the job pipeline and the engine.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::messages::Command;
use crate::oneshot::run_oneshot;
use crate::progress::ProgressSink;
use crate::session::{EngineSession, SessionConfig, SessionReport};

/// What to scan. File names are passed to the engine verbatim and resolved
/// relative to its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub scan_file: String,
    pub db_file: String,
    pub multi_hits: bool,
    pub hmmer3_compat: bool,
}

impl ScanRequest {
    /// A request with multi-hit scanning on and HMMER3 compatibility off.
    pub fn new(scan_file: impl Into<String>, db_file: impl Into<String>) -> Self {
        Self {
            scan_file: scan_file.into(),
            db_file: db_file.into(),
            multi_hits: true,
            hmmer3_compat: false,
        }
    }

    pub(crate) fn command(&self) -> Command<'_> {
        Command::Scan {
            scan_file: &self.scan_file,
            db_file: &self.db_file,
            multi_hits: self.multi_hits,
            hmmer3_compat: self.hmmer3_compat,
        }
    }
}

/// Which control protocol the engine binary speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineProtocol {
    /// Commands on stdin, status replies on stdout.
    #[default]
    Interactive,
    /// Files as arguments, progress lines on stdout.
    Oneshot,
}

impl FromStr for EngineProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "oneshot" => Ok(Self::Oneshot),
            other => Err(format!(
                "unknown engine protocol {other:?} (expected \"interactive\" or \"oneshot\")"
            )),
        }
    }
}

/// Runs one scan to completion.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn scan(
        &self,
        request: &ScanRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<SessionReport, EngineError>;
}

/// [`ScanEngine`] backed by a real engine binary.
#[derive(Debug, Clone)]
pub struct EngineRunner {
    binary: PathBuf,
    protocol: EngineProtocol,
    config: SessionConfig,
}

impl EngineRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            protocol: EngineProtocol::default(),
            config: SessionConfig::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: EngineProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl ScanEngine for EngineRunner {
    async fn scan(
        &self,
        request: &ScanRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<SessionReport, EngineError> {
        match self.protocol {
            EngineProtocol::Interactive => {
                EngineSession::launch(&self.binary, request, &self.config, progress)?
                    .with_cancellation(cancel)
                    .wait()
                    .await
            }
            EngineProtocol::Oneshot => {
                run_oneshot(&self.binary, request, &self.config, progress, cancel).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
