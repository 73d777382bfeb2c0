//! Submission portals.

use std::fmt;

use crate::descriptor::Descriptor;
use crate::error::Result;

/// One work queue of a device.
pub trait Portal: Send + Sync + fmt::Debug {
    /// Post a descriptor without blocking.
    ///
    /// On success the device writes the descriptor's completion exactly
    /// once. On [`QueueBusy`](crate::AccelError::QueueBusy) nothing was
    /// posted and the same descriptor may be offered again.
    fn enqueue(&self, descriptor: &Descriptor) -> Result<()>;

    /// Descriptors the queue holds before it reports busy.
    fn depth(&self) -> usize;
}
