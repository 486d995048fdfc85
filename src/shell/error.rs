//! Error taxonomy for shell sessions.

use std::time::Duration;

use thiserror::Error;

use super::SessionKind;

/// Errors surfaced synchronously by session operations.
///
/// A subprocess dying mid-session is not an `Err`: every affected command is
/// completed with [`ExitStatus::Terminated`](super::ExitStatus::Terminated)
/// instead, so callers must inspect each command's terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    /// The startup canary was not echoed back in time.
    #[error("shell did not answer the startup probe within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    /// The interpreter refused the privilege-escalation request.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// The subprocess could not be spawned or its streams failed before it was ready.
    #[error("shell failed to start: {message}")]
    StartupIo { message: String },

    /// `submit` was called on a session that is closing or closed.
    #[error("unable to add commands to a closed shell")]
    SessionClosed,

    /// A caller-supplied wait deadline elapsed before the command finished.
    #[error("command {id} did not finish before the wait deadline")]
    WaitTimeout { id: usize },

    /// No interpreter is configured for the requested kind.
    #[error("no interpreter configured for {kind} sessions")]
    NoInterpreter { kind: SessionKind },

    /// The sentinel token would not survive the shell unquoted.
    #[error("sentinel token {token:?} must be non-empty ASCII alphanumerics, '_' or '-'")]
    InvalidToken { token: String },
}

impl ShellError {
    pub(crate) fn startup_io(err: impl std::fmt::Display) -> Self {
        Self::StartupIo {
            message: err.to_string(),
        }
    }

    /// Whether an elevated session may retry construction after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StartupIo { .. } | Self::StartupTimeout { .. })
    }
}
