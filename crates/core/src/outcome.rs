//! Final result of one engine session.

use std::fmt;

use serde::Serialize;

/// Terminal result of an engine session.
///
/// Set exactly once, when the session enters a terminal protocol state.
/// A session that never reaches one keeps the default, [`Outcome::Failed`].
/// The discriminants are the process exit codes used by the direct `scan`
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded = 0,
    TimedOut = 1,
    Cancelled = 2,
    #[default]
    Failed = 3,
}

impl Outcome {
    /// Ordinal of this outcome, used verbatim as a process exit code.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_ordinals() {
        assert_eq!(Outcome::Succeeded.code(), 0);
        assert_eq!(Outcome::TimedOut.code(), 1);
        assert_eq!(Outcome::Cancelled.code(), 2);
        assert_eq!(Outcome::Failed.code(), 3);
    }

    #[test]
    fn default_is_failed() {
        assert_eq!(Outcome::default(), Outcome::Failed);
        assert!(!Outcome::default().is_success());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&Outcome::TimedOut).unwrap();
        assert_eq!(json, r#""timed_out""#);
        assert_eq!(Outcome::TimedOut.to_string(), "timed_out");
    }
}
