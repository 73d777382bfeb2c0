//! Error types for accelerator submission and completion.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, AccelError>;

/// Accelerator error taxonomy.
#[derive(Debug, Error)]
pub enum AccelError {
    /// Work queue momentarily full; resubmit the same descriptor.
    #[error("work queue busy")]
    QueueBusy,

    /// Device could not translate a buffer address.
    #[error("page fault at 0x{address:016x} (fault info 0x{fault_info:02x})")]
    PageFault { fault_info: u8, address: u64 },

    /// The job cannot be expressed as a descriptor.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Device reported an error status.
    #[error("device error: status 0x{status:02x}, error code 0x{error_code:02x}")]
    Device { status: u8, error_code: u8 },

    /// No device or queue accepts the operation.
    #[error("no accelerator available for {0}")]
    NoDevice(&'static str),

    /// Completion record not written in time.
    #[error("completion not observed within {0:?}")]
    Timeout(Duration),

    /// Engine error reported through a completion record.
    #[error(transparent)]
    Engine(#[from] orobas_core::Error),
}

impl AccelError {
    pub fn config(message: impl Into<String>) -> Self {
        AccelError::InvalidConfiguration(message.into())
    }

    /// Retrying the identical descriptor may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AccelError::QueueBusy)
    }

    /// Failure raised by the device itself.
    pub fn is_device_error(&self) -> bool {
        matches!(self, AccelError::PageFault { .. } | AccelError::Device { .. })
    }

    /// The job may be redirected to the software engine, provided the
    /// stream has not started on the accelerator.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            AccelError::NoDevice(_) | AccelError::InvalidConfiguration(_)
        )
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AccelError::QueueBusy => "queue_busy",
            AccelError::PageFault { .. } => "page_fault",
            AccelError::InvalidConfiguration(_) => "invalid_configuration",
            AccelError::Device { .. } => "device_error",
            AccelError::NoDevice(_) => "no_device",
            AccelError::Timeout(_) => "timeout",
            AccelError::Engine(e) => e.category(),
        }
    }
}
