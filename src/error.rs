// SPDX-License-Identifier: Apache-2.0 OR MIT
// Chained error type shared by producers, the handler thread and the
// lifecycle controller.

use crate::lifecycle::State;
use nix::errno::Errno;

/// Maximum cause-chain depth the handler tolerates before giving up.
pub const MAX_ERR_DEPTH: usize = 5;

/// What went wrong.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation attempted from a lifecycle state that does not allow it.
    #[error("illegal state: {state:?}")]
    IllegalState { state: State },

    /// Bad configuration value (sink path, level name, filter rule).
    #[error("configuration error: {0}")]
    Config(String),

    /// Non-blocking enqueue kept failing after the retry budget.
    #[error("send failed after {retries} retries")]
    RetriesExhausted { retries: u32 },

    /// Control-channel peer answered with something unexpected.
    #[error("protocol mismatch: expected {expected:?}, got {got:?}")]
    ProtocolMismatch { expected: String, got: String },

    /// A platform call failed.
    #[error("{call} failed: {errno}")]
    Platform { call: &'static str, errno: Errno },

    /// A logged assertion did not hold.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// The handler accumulated more chained errors than MAX_ERR_DEPTH.
    #[error("too many errors ({depth}), aborting")]
    TooManyErrors { depth: usize },

    /// The handler thread panicked instead of returning.
    #[error("internal handler panicked")]
    HandlerPanicked,
}

/// An error with an optional chain of causes. The head is always the most
/// recent failure; older failures hang off `cause`.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: Option<Box<Error>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, cause: None }
    }

    pub fn illegal_state(state: State) -> Self {
        Self::new(ErrorKind::IllegalState { state })
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config(msg.into()))
    }

    pub fn retries_exhausted(retries: u32) -> Self {
        Self::new(ErrorKind::RetriesExhausted { retries })
    }

    pub fn protocol(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolMismatch {
            expected: expected.into(),
            got: got.into(),
        })
    }

    pub fn platform(call: &'static str, errno: Errno) -> Self {
        Self::new(ErrorKind::Platform { call, errno })
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssertionFailed(msg.into()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Make `newer` the head of the chain, with `self` as its cause.
    /// Matches the handler discipline: the most recent failure is reported
    /// first, earlier ones are reachable through `source()`.
    pub fn chain(self, newer: Error) -> Error {
        let mut head = newer;
        // Append self at the end of newer's existing chain.
        let mut tail = &mut head;
        while tail.cause.is_some() {
            tail = tail.cause.as_mut().unwrap();
        }
        tail.cause = Some(Box::new(self));
        head
    }

    /// Number of errors in the chain, the head included.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut cur = self;
        while let Some(cause) = &cur.cause {
            depth += 1;
            cur = cause;
        }
        depth
    }

    /// Render the whole chain on one line, head first.
    pub fn display_chain(&self) -> String {
        let mut out = self.kind.to_string();
        let mut cur = self;
        while let Some(cause) = &cur.cause {
            out.push_str(": ");
            out.push_str(&cause.kind.to_string());
            cur = cause;
        }
        out
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Chain `err` onto an accumulator, keeping the first accumulator intact as
/// the tail of the chain.
pub(crate) fn accumulate(acc: &mut Option<Error>, err: Error) {
    *acc = Some(match acc.take() {
        Some(prev) => prev.chain(err),
        None => err,
    });
}
