//! One live execution of the interactive engine.
//!
//! An [`EngineSession`] owns the engine process and runs three activities
//! over its streams:
//!
//! - the **writer** sends `scan`, then polls with `state` until a terminal
//!   state is recorded, then sends `quit`;
//! - the **status reader** parses stdout lines, drives the protocol state
//!   and surfaces progress readings;
//! - the **diagnostics reader** drains stderr into the log.
//!
//! The activities share a [`SharedState`] and stop once the state reaches
//! `Terminated` or their stream ends. [`EngineSession::wait`] joins them,
//! then waits for the process itself (killing it after a grace period).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scanny_core::outcome::Outcome;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::EngineConnection;
use crate::error::{is_closed_pipe, EngineError, LaunchError};
use crate::messages::{parse_status_line, Command};
use crate::progress::ProgressSink;
use crate::runner::ScanRequest;
use crate::state::{ProtocolState, SharedState, Snapshot};

/// Default interval between `state` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time the engine gets to exit after the activities finish.
pub const DEFAULT_QUIT_GRACE: Duration = Duration::from_secs(5);

/// Tunables for one engine session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between `state` polls while the scan is running.
    pub poll_interval: Duration,
    /// Abort the scan with [`Outcome::TimedOut`] after this long.
    pub timeout: Option<Duration>,
    /// How long to wait for the process to exit before killing it.
    pub quit_grace: Duration,
    /// Forward engine stderr to the log. When `false` it is still drained.
    pub relay_diagnostics: bool,
    /// Directory the engine runs in (and resolves its file arguments from).
    pub working_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            quit_grace: DEFAULT_QUIT_GRACE,
            relay_diagnostics: true,
            working_dir: None,
        }
    }
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: Outcome,
    pub final_state: ProtocolState,
    /// Process exit code; `None` if it was killed or died from a signal.
    pub exit_code: Option<i32>,
}

/// A running engine session. Consumed by [`wait`](Self::wait), so it can
/// never be reused for a second scan.
#[derive(Debug)]
pub struct EngineSession {
    child: Child,
    state: SharedState,
    writer: JoinHandle<Result<(), EngineError>>,
    status: JoinHandle<Result<(), EngineError>>,
    diagnostics: JoinHandle<()>,
    timeout: Option<Duration>,
    quit_grace: Duration,
    cancel: CancellationToken,
}

impl EngineSession {
    /// Spawn the engine and start the three session activities.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn launch(
        binary: &Path,
        request: &ScanRequest,
        config: &SessionConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, LaunchError> {
        let connection = EngineConnection::spawn(
            binary,
            std::iter::empty::<&str>(),
            config.working_dir.as_deref(),
        )?;
        tracing::info!(
            binary = %binary.display(),
            pid = connection.id(),
            scan_file = %request.scan_file,
            db_file = %request.db_file,
            "Engine session started",
        );

        let (child, streams) = connection.into_parts();
        let state = SharedState::new();

        let writer = tokio::spawn(write_commands(
            streams.commands,
            request.clone(),
            state.clone(),
            config.poll_interval,
        ));
        let status = tokio::spawn(read_status(streams.status, state.clone(), progress));
        let diagnostics = tokio::spawn(relay_diagnostics(
            streams.diagnostics,
            state.clone(),
            config.relay_diagnostics,
        ));

        Ok(Self {
            child,
            state,
            writer,
            status,
            diagnostics,
            timeout: config.timeout,
            quit_grace: config.quit_grace,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop the scan with [`Outcome::Cancelled`] when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current protocol state, without waiting.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Block until the session has ended and the engine process is gone.
    ///
    /// Returns the first fault of the activities (a status-stream fault
    /// wins over a command-stream fault). Otherwise reports the outcome
    /// recorded by the protocol state.
    pub async fn wait(self) -> Result<SessionReport, EngineError> {
        let Self {
            mut child,
            state,
            mut writer,
            mut status,
            mut diagnostics,
            timeout,
            quit_grace,
            cancel,
        } = self;

        let (writer_res, status_res) = {
            let activities = async { tokio::join!(&mut writer, &mut status) };
            tokio::pin!(activities);
            tokio::select! {
                res = &mut activities => res,
                outcome = interrupted(timeout, &cancel) => {
                    if state.interrupt(outcome) {
                        tracing::warn!(outcome = %outcome, "Engine session interrupted");
                    }
                    match tokio::time::timeout(quit_grace, &mut activities).await {
                        Ok(res) => res,
                        Err(_) => {
                            // The writer may already be gone, so nobody else
                            // will move the state past `Failed`.
                            tracing::warn!(
                                grace_secs = quit_grace.as_secs_f64(),
                                "Engine did not stop after interrupt, killing it",
                            );
                            if let Err(e) = child.kill().await {
                                tracing::warn!(error = %e, "Failed to kill engine process");
                            }
                            state.terminate();
                            activities.await
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(quit_grace, &mut diagnostics).await.is_err() {
            diagnostics.abort();
        }

        let exit_code = match tokio::time::timeout(quit_grace, child.wait()).await {
            Ok(Ok(exit)) => exit.code(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for engine process");
                None
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = quit_grace.as_secs_f64(),
                    "Engine did not exit in time, killing it",
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill engine process");
                }
                None
            }
        };

        let status_res = status_res.map_err(EngineError::from).and_then(|r| r);
        let writer_res = writer_res.map_err(EngineError::from).and_then(|r| r);
        status_res?;
        writer_res?;

        let snap = state.snapshot();
        tracing::info!(
            outcome = %snap.outcome,
            state = ?snap.state,
            exit_code,
            "Engine session finished",
        );
        Ok(SessionReport {
            outcome: snap.outcome,
            final_state: snap.state,
            exit_code,
        })
    }
}

/// Resolves with the outcome to record when the session is cut short.
async fn interrupted(timeout: Option<Duration>, cancel: &CancellationToken) -> Outcome {
    match timeout {
        Some(limit) => tokio::select! {
            _ = tokio::time::sleep(limit) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        },
        None => {
            cancel.cancelled().await;
            Outcome::Cancelled
        }
    }
}

/// Resolves once the state reaches `Terminated`.
async fn terminated(rx: &mut watch::Receiver<Snapshot>) {
    loop {
        if rx.borrow_and_update().state == ProtocolState::Terminated {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// Outcome of a single command write.
enum Sent {
    Ok,
    PipeClosed,
}

async fn send(stdin: &mut ChildStdin, command: Command<'_>) -> Result<Sent, std::io::Error> {
    let line = command.to_line();
    tracing::trace!(command = line.trim_end(), "Sending engine command");
    let res = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
    .await;
    match res {
        Ok(()) => Ok(Sent::Ok),
        Err(e) if is_closed_pipe(&e) => Ok(Sent::PipeClosed),
        Err(e) => Err(e),
    }
}

async fn write_commands(
    mut stdin: ChildStdin,
    request: ScanRequest,
    state: SharedState,
    poll_interval: Duration,
) -> Result<(), EngineError> {
    let mut rx = state.subscribe();

    loop {
        let snap = *rx.borrow_and_update();
        let sent = match snap.state {
            ProtocolState::Init => {
                state.begin_scan();
                send(&mut stdin, request.command()).await
            }
            ProtocolState::Running if snap.status_closed => break,
            ProtocolState::Running => match send(&mut stdin, Command::State).await {
                Ok(Sent::Ok) => {
                    tokio::select! {
                        _ = rx.changed() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                    Ok(Sent::Ok)
                }
                other => other,
            },
            ProtocolState::Done | ProtocolState::Failed => {
                if state.terminate() {
                    tracing::debug!("Sending quit to engine");
                    if let Err(e) = send(&mut stdin, Command::Quit).await {
                        tracing::debug!(error = %e, "Failed to send quit");
                    }
                }
                break;
            }
            ProtocolState::Terminated => break,
        };

        match sent {
            Ok(Sent::Ok) => {}
            Ok(Sent::PipeClosed) => {
                tracing::debug!("Engine closed its command stream");
                break;
            }
            Err(e) => {
                state.interrupt(Outcome::Failed);
                state.terminate();
                return Err(e.into());
            }
        }
    }

    Ok(())
}

async fn read_status(
    stdout: ChildStdout,
    state: SharedState,
    progress: Arc<dyn ProgressSink>,
) -> Result<(), EngineError> {
    let mut lines = BufReader::new(stdout).lines();
    let mut rx = state.subscribe();

    let result = loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            _ = terminated(&mut rx) => break Ok(()),
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => {
                state.interrupt(Outcome::Failed);
                break Err(EngineError::Io(e));
            }
        };

        tracing::trace!(line = %line, "Engine status");
        let parsed = match parse_status_line(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(error = %e, "Unreadable engine status line");
                state.interrupt(Outcome::Failed);
                break Err(e.into());
            }
        };

        if let Some(percent) = parsed.progress {
            if !state.snapshot().state.is_terminal() {
                progress.on_progress(percent);
            }
        }

        let before = state.snapshot().state;
        let after = state.apply_status(&parsed);
        if after.state != before {
            tracing::debug!(from = ?before, to = ?after.state, "Engine state changed");
        }
    };

    state.close_status();
    result
}

async fn relay_diagnostics(stderr: ChildStderr, state: SharedState, enabled: bool) {
    let mut lines = BufReader::new(stderr).lines();
    let mut rx = state.subscribe();

    loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            _ = terminated(&mut rx) => break,
        };
        match next {
            Ok(Some(line)) => {
                if enabled {
                    tracing::info!(line = %line, "Engine stderr");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading engine stderr");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
