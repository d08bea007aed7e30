//! Standalone engine protocol.
//!
//! Older engine builds take the scan and database files as arguments and
//! report on stdout without reading any commands:
//!
//! ```text
//! 12%
//! 57%
//! done
//! ```
//!
//! A scan succeeds when `done` was printed and the process exited with
//! status 0.

use std::path::Path;
use std::sync::Arc;

use scanny_core::outcome::Outcome;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::connection::{EngineConnection, EngineStreams};
use crate::error::{EngineError, ProtocolError};
use crate::messages::parse_percent;
use crate::progress::ProgressSink;
use crate::runner::ScanRequest;
use crate::session::{SessionConfig, SessionReport};
use crate::state::ProtocolState;

/// One stdout line of a standalone engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneshotLine {
    Progress(scanny_core::types::Percent),
    Done,
    Fail,
}

/// Parse a `done`, `fail`, `NN` or `NN%` line.
pub fn parse_oneshot_line(line: &str) -> Result<OneshotLine, ProtocolError> {
    match line.trim() {
        "done" => Ok(OneshotLine::Done),
        "fail" => Ok(OneshotLine::Fail),
        "" => Err(ProtocolError::MalformedLine(line.to_string())),
        token => parse_percent(token)
            .map(OneshotLine::Progress)
            .ok_or_else(|| ProtocolError::InvalidProgress {
                token: token.to_string(),
                line: line.to_string(),
            }),
    }
}

/// Run a standalone engine to completion.
pub async fn run_oneshot(
    binary: &Path,
    request: &ScanRequest,
    config: &SessionConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> Result<SessionReport, EngineError> {
    let connection = EngineConnection::spawn(
        binary,
        [request.scan_file.as_str(), request.db_file.as_str()],
        config.working_dir.as_deref(),
    )?;
    tracing::info!(
        binary = %binary.display(),
        pid = connection.id(),
        scan_file = %request.scan_file,
        db_file = %request.db_file,
        "Standalone engine started",
    );

    let (mut child, streams) = connection.into_parts();
    let EngineStreams {
        commands,
        status,
        diagnostics: stderr,
    } = streams;
    drop(commands);

    let relay = config.relay_diagnostics;
    let diagnostics = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if relay {
                tracing::info!(line = %line, "Engine stderr");
            }
        }
    });

    let mut lines = BufReader::new(status).lines();
    let mut verdict: Option<OneshotLine> = None;

    let read = async {
        while let Some(line) = lines.next_line().await? {
            match parse_oneshot_line(&line)? {
                OneshotLine::Progress(percent) => progress.on_progress(percent),
                terminal => {
                    tracing::debug!(line = %line, "Standalone engine finished");
                    verdict = Some(terminal);
                }
            }
        }
        Ok::<(), EngineError>(())
    };

    let limit = async {
        match config.timeout {
            Some(t) => tokio::select! {
                _ = tokio::time::sleep(t) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Cancelled,
            },
            None => {
                cancel.cancelled().await;
                Outcome::Cancelled
            }
        }
    };

    let interrupted = tokio::select! {
        res = read => {
            if let Err(e) = res {
                if let Err(kill_err) = child.kill().await {
                    tracing::warn!(error = %kill_err, "Failed to kill engine process");
                }
                diagnostics.abort();
                return Err(e);
            }
            None
        }
        outcome = limit => Some(outcome),
    };

    if let Some(outcome) = interrupted {
        tracing::warn!(outcome = %outcome, "Standalone engine interrupted, killing it");
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill engine process");
        }
        diagnostics.abort();
        return Ok(SessionReport {
            outcome,
            final_state: ProtocolState::Failed,
            exit_code: None,
        });
    }

    let exit = match tokio::time::timeout(config.quit_grace, child.wait()).await {
        Ok(res) => res?,
        Err(_) => {
            tracing::warn!("Standalone engine closed stdout but did not exit, killing it");
            child.kill().await?;
            child.wait().await?
        }
    };
    if tokio::time::timeout(config.quit_grace, diagnostics).await.is_err() {
        tracing::debug!("Engine stderr still open after exit");
    }

    let succeeded = verdict == Some(OneshotLine::Done) && exit.success();
    let (outcome, final_state) = if succeeded {
        (Outcome::Succeeded, ProtocolState::Done)
    } else {
        (Outcome::Failed, ProtocolState::Failed)
    };
    tracing::info!(outcome = %outcome, exit_code = exit.code(), "Standalone engine exited");

    Ok(SessionReport {
        outcome,
        final_state,
        exit_code: exit.code(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use scanny_core::types::Percent;

    use super::*;
    use crate::testing::{fake_engine, retry_busy};

    fn recorder() -> (Arc<Mutex<Vec<Percent>>>, Arc<dyn ProgressSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn ProgressSink> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |p: Percent| seen.lock().unwrap().push(p))
        };
        (seen, sink)
    }

    async fn run(script: &str, config: SessionConfig) -> (Result<SessionReport, EngineError>, Vec<Percent>) {
        let (_dir, engine) = fake_engine(script);
        let (seen, sink) = recorder();
        let request = ScanRequest::new("seqs.json", "pfam.dcp");
        let result = retry_busy(|| {
            run_oneshot(&engine, &request, &config, Arc::clone(&sink), CancellationToken::new())
        })
        .await;
        let seen = seen.lock().unwrap().clone();
        (result, seen)
    }

    #[test]
    fn parses_each_line_kind() {
        assert_matches!(parse_oneshot_line("done"), Ok(OneshotLine::Done));
        assert_matches!(parse_oneshot_line("fail\r"), Ok(OneshotLine::Fail));
        assert_matches!(parse_oneshot_line("42%"), Ok(OneshotLine::Progress(42)));
        assert_matches!(parse_oneshot_line("7"), Ok(OneshotLine::Progress(7)));
    }

    #[test]
    fn rejects_unknown_lines() {
        assert_matches!(
            parse_oneshot_line("loading database"),
            Err(ProtocolError::InvalidProgress { .. })
        );
        assert_matches!(parse_oneshot_line("   "), Err(ProtocolError::MalformedLine(_)));
    }

    #[tokio::test]
    async fn done_and_zero_exit_succeeds() {
        let script = r#"
[ "$1" = "seqs.json" ] && [ "$2" = "pfam.dcp" ] || exit 9
echo "10%"
echo "60%"
echo "100%"
echo "done"
"#;
        let (result, seen) = run(script, SessionConfig::default()).await;
        let report = result.expect("run");
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(report.final_state, ProtocolState::Done);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(seen, vec![10, 60, 100]);
    }

    #[tokio::test]
    async fn done_with_nonzero_exit_fails() {
        let (result, _) = run("echo done\nexit 4\n", SessionConfig::default()).await;
        let report = result.expect("run");
        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.exit_code, Some(4));
    }

    #[tokio::test]
    async fn fail_line_fails() {
        let (result, seen) = run("echo 5%\necho fail\n", SessionConfig::default()).await;
        assert_eq!(result.expect("run").outcome, Outcome::Failed);
        assert_eq!(seen, vec![5]);
    }

    #[tokio::test]
    async fn garbage_line_is_a_protocol_error() {
        let (result, _) = run("echo hello\nexec sleep 30\n", SessionConfig::default()).await;
        assert_matches!(result, Err(EngineError::Protocol(_)));
    }

    #[tokio::test]
    async fn timeout_kills_the_engine() {
        let config = SessionConfig {
            timeout: Some(Duration::from_millis(150)),
            ..SessionConfig::default()
        };
        let (result, _) = run("echo 1%\nexec sleep 30\n", config).await;
        let report = result.expect("run");
        assert_eq!(report.outcome, Outcome::TimedOut);
        assert_eq!(report.exit_code, None);
    }
}
