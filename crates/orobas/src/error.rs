//! Orchestrator error types.

use std::time::Duration;

use orobas_accel::AccelError;
use thiserror::Error;

/// Result type alias for orchestrated operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors of jobs and multi-chunk operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Software engine error.
    #[error(transparent)]
    Engine(#[from] orobas_core::Error),

    /// Accelerator error.
    #[error(transparent)]
    Accel(#[from] AccelError),

    /// Outstanding work did not finish within the operation's budget.
    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// A stream running on the accelerator can no longer continue there,
    /// and moving it to software mid-stream is refused.
    #[error("stream started on the accelerator cannot move to software mid-stream")]
    MidStreamFallback,

    /// Multi-chunk container header is inconsistent.
    #[error("invalid container: {0}")]
    InvalidContainer(&'static str),
}

impl Error {
    /// Convert an accelerator error, surfacing timeouts directly.
    pub fn from_accel(error: AccelError) -> Self {
        match error {
            AccelError::Timeout(elapsed) => Error::Timeout { elapsed },
            AccelError::Engine(e) => Error::Engine(e),
            other => Error::Accel(other),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Engine(orobas_core::Error::config(message))
    }

    /// Whether the produced data failed an integrity check.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::Engine(e) if e.is_integrity_failure())
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Engine(e) => e.category(),
            Error::Accel(e) => e.category(),
            Error::Timeout { .. } => "timeout",
            Error::MidStreamFallback => "mid_stream_fallback",
            Error::InvalidContainer(_) => "invalid_container",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_accel() {
        let err = Error::from_accel(AccelError::Timeout(Duration::from_secs(1)));
        assert!(matches!(err, Error::Timeout { .. }));
        let err = Error::from_accel(AccelError::Engine(orobas_core::Error::VerificationFailed {
            expected: 1,
            actual: 2,
        }));
        assert!(err.is_integrity_failure());
        assert_eq!(Error::from_accel(AccelError::QueueBusy).category(), "queue_busy");
    }
}
