//! Transfer errors, pinned to worker exit codes.

use std::fmt;
use std::io;

use afd_core::exit::WorkerExit;

/// A failed transfer phase.
///
/// Every error names the [`WorkerExit`] the worker will terminate with, so
/// the dispatcher's classification of the outcome is decided at the point
/// of failure, not reconstructed later.
#[derive(Debug)]
pub struct TransferError {
    code: WorkerExit,
    detail: String,
}

impl TransferError {
    /// An error with the given exit code and human-readable detail.
    #[must_use]
    pub fn new(code: WorkerExit, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// Wraps an I/O error from a given phase.
    #[must_use]
    pub fn io(code: WorkerExit, err: &io::Error) -> Self {
        // Timeouts short-circuit whatever phase they interrupted.
        let code = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => WorkerExit::Timeout,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
                WorkerExit::ConnectionReset
            }
            io::ErrorKind::ConnectionRefused => WorkerExit::ConnectionRefused,
            _ => code,
        };
        Self {
            code,
            detail: err.to_string(),
        }
    }

    /// The exit code the worker must terminate with.
    #[must_use]
    pub const fn exit_code(&self) -> WorkerExit {
        self.code
    }

    /// The human-readable detail for the transfer log.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for TransferError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_given_code() {
        let err = TransferError::new(WorkerExit::Chdir, "550 no such directory");
        assert_eq!(err.exit_code(), WorkerExit::Chdir);
        assert!(err.to_string().contains("550"));
    }

    #[test]
    fn io_timeouts_override_the_phase_code() {
        let io_err = io::Error::from(io::ErrorKind::TimedOut);
        let err = TransferError::io(WorkerExit::WriteRemote, &io_err);
        assert_eq!(err.exit_code(), WorkerExit::Timeout);
    }

    #[test]
    fn io_resets_map_to_connection_reset() {
        let io_err = io::Error::from(io::ErrorKind::BrokenPipe);
        let err = TransferError::io(WorkerExit::WriteRemote, &io_err);
        assert_eq!(err.exit_code(), WorkerExit::ConnectionReset);
    }

    #[test]
    fn other_io_errors_keep_the_phase_code() {
        let io_err = io::Error::from(io::ErrorKind::PermissionDenied);
        let err = TransferError::io(WorkerExit::OpenRemote, &io_err);
        assert_eq!(err.exit_code(), WorkerExit::OpenRemote);
    }
}
