//! Engine protocol commands and status lines.
//!
//! Commands go to the engine's stdin, one per line. Each command carries
//! the engine's reply template after a `|`; the engine answers on stdout
//! with one whitespace-separated status line per command:
//!
//! ```text
//! > scan seqs.json pfam.dcp 1 0 | {1} _ _
//! < ok _ _
//! > state | {1} {2} {3}
//! < ok run 42
//! > state | {1} {2} {3}
//! < ok done 100
//! > quit
//! ```

use scanny_core::types::Percent;

use crate::error::ProtocolError;

/// A command written to the engine's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Start scanning `scan_file` against `db_file`.
    Scan {
        scan_file: &'a str,
        db_file: &'a str,
        multi_hits: bool,
        hmmer3_compat: bool,
    },
    /// Ask for the current state and progress.
    State,
    /// Ask the engine to exit.
    Quit,
}

impl Command<'_> {
    /// Render the command as a newline-terminated protocol line.
    pub fn to_line(&self) -> String {
        match self {
            Self::Scan {
                scan_file,
                db_file,
                multi_hits,
                hmmer3_compat,
            } => format!(
                "scan {scan_file} {db_file} {} {} | {{1}} _ _\n",
                u8::from(*multi_hits),
                u8::from(*hmmer3_compat),
            ),
            Self::State => "state | {1} {2} {3}\n".to_string(),
            Self::Quit => "quit\n".to_string(),
        }
    }
}

/// First token of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultToken {
    Ok,
    Fail,
}

/// Second token of a status line.
///
/// Replies to `scan` carry a placeholder (`_`) here, which lands in
/// [`StateToken::Other`] and never drives a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateToken {
    Run,
    Done,
    Fail,
    Other(String),
}

impl StateToken {
    fn parse(token: &str) -> Self {
        match token {
            "run" => Self::Run,
            "done" => Self::Done,
            "fail" => Self::Fail,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub result: ResultToken,
    pub state: StateToken,
    /// Present on `ok run <progress>` lines, and on `ok done <progress>`
    /// when the token is a valid percentage.
    pub progress: Option<Percent>,
}

/// Parse a `<result> <state> <progress>` status line.
///
/// Tokens beyond the third are ignored. On `ok run` lines the progress
/// token must be an integer percentage (a trailing `%` is tolerated); on
/// `ok done` lines it is read when valid and ignored otherwise.
pub fn parse_status_line(line: &str) -> Result<StatusLine, ProtocolError> {
    let mut tokens = line.split_whitespace();
    let (Some(result), Some(state), Some(progress)) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(ProtocolError::MalformedLine(line.to_string()));
    };

    let result = match result {
        "ok" => ResultToken::Ok,
        "fail" => ResultToken::Fail,
        other => {
            return Err(ProtocolError::UnknownResult {
                token: other.to_string(),
                line: line.to_string(),
            })
        }
    };
    let state = StateToken::parse(state);

    let progress = match (result, &state) {
        (ResultToken::Ok, StateToken::Run) => Some(parse_percent(progress).ok_or_else(|| {
            ProtocolError::InvalidProgress {
                token: progress.to_string(),
                line: line.to_string(),
            }
        })?),
        // The final reading rides on the `done` line; a placeholder there
        // is not an error.
        (ResultToken::Ok, StateToken::Done) => parse_percent(progress),
        _ => None,
    };

    Ok(StatusLine {
        result,
        state,
        progress,
    })
}

/// Parse `42` or `42%` into a percentage, rejecting values above 100.
pub(crate) fn parse_percent(token: &str) -> Option<Percent> {
    let digits = token.strip_suffix('%').unwrap_or(token);
    digits.parse::<Percent>().ok().filter(|p| *p <= 100)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn scan_command_encodes_flags_as_digits() {
        let cmd = Command::Scan {
            scan_file: "seqs.json",
            db_file: "pfam.dcp",
            multi_hits: true,
            hmmer3_compat: false,
        };
        assert_eq!(cmd.to_line(), "scan seqs.json pfam.dcp 1 0 | {1} _ _\n");
    }

    #[test]
    fn poll_and_quit_commands() {
        assert_eq!(Command::State.to_line(), "state | {1} {2} {3}\n");
        assert_eq!(Command::Quit.to_line(), "quit\n");
    }

    #[test]
    fn parse_running_line_surfaces_progress() {
        let line = parse_status_line("ok run 42").unwrap();
        assert_eq!(line.result, ResultToken::Ok);
        assert_eq!(line.state, StateToken::Run);
        assert_eq!(line.progress, Some(42));
    }

    #[test]
    fn parse_done_line_carries_final_progress() {
        let line = parse_status_line("ok done 100").unwrap();
        assert_eq!(line.state, StateToken::Done);
        assert_eq!(line.progress, Some(100));
    }

    #[test]
    fn done_line_placeholder_progress_is_ignored() {
        let line = parse_status_line("ok done _").unwrap();
        assert_eq!(line.state, StateToken::Done);
        assert_eq!(line.progress, None);
        assert_eq!(parse_status_line("fail done 100").unwrap().progress, None);
    }

    #[test]
    fn parse_scan_ack_placeholder() {
        let line = parse_status_line("ok _ _").unwrap();
        assert_eq!(line.state, StateToken::Other("_".into()));
        assert_eq!(line.progress, None);
    }

    #[test]
    fn fail_result_ignores_progress_token() {
        let line = parse_status_line("fail run garbage").unwrap();
        assert_eq!(line.result, ResultToken::Fail);
        assert_eq!(line.progress, None);
    }

    #[test]
    fn percent_sign_is_tolerated() {
        assert_eq!(parse_status_line("ok run 7%").unwrap().progress, Some(7));
    }

    #[test]
    fn extra_whitespace_is_tolerated() {
        let line = parse_status_line("  ok   run\t9  ").unwrap();
        assert_eq!(line.progress, Some(9));
    }

    #[test]
    fn too_few_tokens_is_malformed() {
        assert_matches!(
            parse_status_line("ok run"),
            Err(ProtocolError::MalformedLine(_))
        );
        assert_matches!(parse_status_line(""), Err(ProtocolError::MalformedLine(_)));
    }

    #[test]
    fn unknown_result_token() {
        assert_matches!(
            parse_status_line("maybe run 3"),
            Err(ProtocolError::UnknownResult { .. })
        );
    }

    #[test]
    fn invalid_progress_on_running_line() {
        assert_matches!(
            parse_status_line("ok run abc"),
            Err(ProtocolError::InvalidProgress { .. })
        );
        assert_matches!(
            parse_status_line("ok run 101"),
            Err(ProtocolError::InvalidProgress { .. })
        );
        assert_matches!(
            parse_status_line("ok run -1"),
            Err(ProtocolError::InvalidProgress { .. })
        );
    }
}
