//! Protocol state shared by the activities of one engine session.
//!
//! The state lives in a [`tokio::sync::watch`] channel. Every transition
//! goes through `send_if_modified`, so writes are serialized and readers
//! are woken only when the state actually changes. Transitions only move
//! toward terminal states; once `Done` or `Failed` is recorded the only
//! further change is to `Terminated`.

use std::sync::Arc;

use scanny_core::outcome::Outcome;
use tokio::sync::watch;

use crate::messages::{ResultToken, StateToken, StatusLine};

/// Lifecycle of one engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Init,
    Running,
    Done,
    Failed,
    /// `quit` has been issued after `Done` or `Failed`.
    Terminated,
}

impl ProtocolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Terminated)
    }
}

/// Everything the session's activities agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: ProtocolState,
    pub outcome: Outcome,
    /// The status stream reached end-of-file.
    pub status_closed: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ProtocolState::Init,
            outcome: Outcome::Failed,
            status_closed: false,
        }
    }
}

impl Snapshot {
    /// Apply one status line. Returns `true` if anything changed.
    ///
    /// A `fail` result forces `Failed` from any non-terminal state. From
    /// `Init`, `run` or `done` only advances to `Running`; from `Running`,
    /// `done` finishes with [`Outcome::Succeeded`] and `fail` with
    /// [`Outcome::Failed`]. Terminal states ignore further lines.
    pub fn apply_status(&mut self, line: &StatusLine) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        if line.result == ResultToken::Fail {
            return self.finish(ProtocolState::Failed, Outcome::Failed);
        }

        match (self.state, &line.state) {
            (_, StateToken::Fail) => self.finish(ProtocolState::Failed, Outcome::Failed),
            (ProtocolState::Init, StateToken::Run | StateToken::Done) => {
                self.state = ProtocolState::Running;
                true
            }
            (ProtocolState::Running, StateToken::Done) => {
                self.finish(ProtocolState::Done, Outcome::Succeeded)
            }
            _ => false,
        }
    }

    fn finish(&mut self, state: ProtocolState, outcome: Outcome) -> bool {
        self.state = state;
        self.outcome = outcome;
        true
    }
}

/// Cloneable handle to the state of one session.
#[derive(Debug, Clone)]
pub struct SharedState {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl Default for SharedState {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self { tx: Arc::new(tx) }
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Apply a status line and return the resulting snapshot.
    pub fn apply_status(&self, line: &StatusLine) -> Snapshot {
        self.tx.send_if_modified(|snap| snap.apply_status(line));
        self.snapshot()
    }

    /// Writer side: the scan command is about to be sent.
    pub fn begin_scan(&self) {
        self.tx.send_if_modified(|snap| {
            if snap.state == ProtocolState::Init {
                snap.state = ProtocolState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Force a non-terminal session into `Failed` with the given outcome.
    ///
    /// Used for protocol faults, timeouts and cancellation. Has no effect
    /// once a terminal state has been recorded, so an engine that already
    /// reported `done` keeps its [`Outcome::Succeeded`].
    pub fn interrupt(&self, outcome: Outcome) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.state.is_terminal() {
                false
            } else {
                snap.finish(ProtocolState::Failed, outcome)
            }
        })
    }

    /// Move `Done`/`Failed` to `Terminated`. Returns `true` if the caller
    /// performed the transition and therefore owns sending `quit`.
    pub fn terminate(&self) -> bool {
        self.tx.send_if_modified(|snap| {
            if matches!(snap.state, ProtocolState::Done | ProtocolState::Failed) {
                snap.state = ProtocolState::Terminated;
                true
            } else {
                false
            }
        })
    }

    /// Status reader side: stdout reached end-of-file.
    pub fn close_status(&self) {
        self.tx.send_if_modified(|snap| {
            let changed = !snap.status_closed;
            snap.status_closed = true;
            changed
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
