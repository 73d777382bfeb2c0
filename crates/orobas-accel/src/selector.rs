//! Per-opcode queue capability masks.

use orobas_core::{Bitset128, Operation};

/// Which queues of one device accept each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSelector {
    masks: [Bitset128; Operation::ALL.len()],
}

impl QueueSelector {
    /// Maximum queues per device.
    pub const MAX_QUEUES: usize = Bitset128::WIDTH;

    /// Every one of `queue_count` queues accepts every operation. Used for
    /// devices without fine-grained operation configuration.
    pub fn all(queue_count: usize) -> Self {
        Self {
            masks: [Bitset128::with_len(queue_count); Operation::ALL.len()],
        }
    }

    /// Masks built from the operations each queue advertises.
    pub fn from_queue_operations<'a, I>(queues: I) -> Self
    where
        I: IntoIterator<Item = &'a [Operation]>,
    {
        let mut selector = Self::default();
        for (queue, operations) in queues.into_iter().enumerate() {
            for op in operations {
                selector.masks[op.index()].set(queue, true);
            }
        }
        selector
    }

    pub fn mask(&self, op: Operation) -> Bitset128 {
        self.masks[op.index()]
    }

    pub fn supports(&self, op: Operation) -> bool {
        !self.mask(op).is_empty()
    }

    /// Keep only the queues in `set` that accept `op`.
    pub fn reduce_by_operation(&self, op: Operation, set: &mut Bitset128) {
        *set &= self.mask(op);
    }
}
