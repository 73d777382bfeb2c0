//! Error types shared by the software engine and the orchestrator.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Engine error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Input stream is malformed.
    #[error("corrupted data: {message}")]
    CorruptedData { message: String },

    /// Output buffer cannot hold the result; cursors were rolled back.
    #[error("more output space needed")]
    MoreOutputNeeded,

    /// Unsupported flag/mode combination.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Self-verification of freshly compressed output failed.
    #[error("verification failed: expected crc 0x{expected:08x}, got 0x{actual:08x}")]
    VerificationFailed { expected: u32, actual: u32 },

    /// Stream trailer checksum does not match the decoded data.
    #[error("checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Input ended before the stream was complete.
    #[error("unexpected EOF after {bytes_read} bytes")]
    UnexpectedEof { bytes_read: usize },

    /// Operation called in the wrong phase.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Feature known but not available on this path.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O error from an adapter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a corrupted data error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Error::CorruptedData {
            message: message.into(),
        }
    }

    /// Create a corrupted data error with offset context.
    pub fn corrupted_at(message: impl Into<String>, offset: usize) -> Self {
        Error::CorruptedData {
            message: format!("{} at offset {}", message.into(), offset),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(message.into())
    }

    /// Create a checksum mismatch error.
    pub fn checksum_mismatch(expected: u32, actual: u32) -> Self {
        Error::ChecksumMismatch { expected, actual }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(bytes_read: usize) -> Self {
        Error::UnexpectedEof { bytes_read }
    }

    /// Check if the caller can retry with different buffers.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MoreOutputNeeded | Error::UnexpectedEof { .. }
        )
    }

    /// Whether this error means produced data cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::VerificationFailed { .. } | Error::ChecksumMismatch { .. }
        )
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::CorruptedData { .. } => "corrupted_data",
            Error::MoreOutputNeeded => "more_output_needed",
            Error::InvalidConfiguration(_) => "invalid_configuration",
            Error::VerificationFailed { .. } => "verification_failed",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::UnexpectedEof { .. } => "unexpected_eof",
            Error::InvalidState { .. } => "invalid_state",
            Error::Unsupported(_) => "unsupported",
            Error::Io(_) => "io_error",
        }
    }
}
