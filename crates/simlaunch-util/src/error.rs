//! Failure taxonomy for simlaunch
//!
//! Every way a run can end badly maps to exactly one [`FailureKind`], and every
//! kind maps to a stable process exit code. The table is part of the CLI
//! contract; do not renumber.

use thiserror::Error;

/// Exit code for a successful run
pub const EXIT_SUCCESS: i32 = 0;

/// Why a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FailureKind {
    /// Bad input, detected before any session starts
    #[error("configuration error")]
    Config,

    /// FIFO or file setup failed before the session started
    #[error("I/O error")]
    Io,

    /// The device layer could not start a session
    #[error("session error")]
    Session,

    /// The app failed to launch
    #[error("launch error")]
    Launch,

    /// No terminal event arrived within the configured timeout
    #[error("timed out")]
    Timeout,

    /// The app died with a failing status outside keepalive mode
    #[error("app crashed")]
    RuntimeCrash,

    /// A host signal asked us to stop
    #[error("interrupted")]
    Interrupted,
}

impl FailureKind {
    /// Stable process exit code for this failure
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::Io => 1,
            FailureKind::Config => 2,
            FailureKind::Session => 3,
            FailureKind::Launch => 4,
            FailureKind::Timeout => 5,
            FailureKind::RuntimeCrash => 6,
            FailureKind::Interrupted => 130,
        }
    }

    /// Whether this failure is an error condition (as opposed to a user request)
    ///
    /// Interrupts end the run with a non-zero code but are not escalated.
    pub fn is_error(self) -> bool {
        !matches!(self, FailureKind::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            FailureKind::Config,
            FailureKind::Io,
            FailureKind::Session,
            FailureKind::Launch,
            FailureKind::Timeout,
            FailureKind::RuntimeCrash,
            FailureKind::Interrupted,
        ];

        let codes: HashSet<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&EXIT_SUCCESS));
    }

    #[test]
    fn interrupt_is_not_an_error() {
        assert!(!FailureKind::Interrupted.is_error());
        assert!(FailureKind::Timeout.is_error());
        assert!(FailureKind::RuntimeCrash.is_error());
    }
}
