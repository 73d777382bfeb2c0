//! Submission and completion observation over a [`DeviceRegistry`].

use std::thread;
use std::time::{Duration, Instant};

use orobas_core::{Operation, OperationResult};

use crate::descriptor::Descriptor;
use crate::device::{DeviceEnumerator, DeviceRegistry};
use crate::error::{AccelError, Result};
use crate::record::{Completion, CompletionHandle, CompletionRecord};

const BUSY_BACKOFF: Duration = Duration::from_micros(100);

/// Entry point of the hardware path. Built once and shared by reference.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: DeviceRegistry,
}

impl Dispatcher {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    pub fn discover(enumerator: &dyn DeviceEnumerator) -> Result<Self> {
        DeviceRegistry::discover(enumerator).map(Self::new)
    }

    /// Dispatcher without devices.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn is_available(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn supports(&self, op: Operation, numa_node: Option<u32>) -> bool {
        self.registry.supports(op, numa_node)
    }

    pub fn max_transfer_size(&self, numa_node: Option<u32>) -> Option<usize> {
        self.registry.min_max_transfer_size(numa_node)
    }

    pub fn min_generation(&self, numa_node: Option<u32>) -> Option<u8> {
        self.registry.min_generation(numa_node)
    }

    /// One non-blocking submission attempt.
    pub fn submit(&self, descriptor: &Descriptor, numa_node: Option<u32>) -> Result<()> {
        self.registry.submit(descriptor, numa_node)
    }

    /// Resubmit the same descriptor while queues are busy, until `deadline`.
    pub fn submit_until(&self, descriptor: &Descriptor, numa_node: Option<u32>, deadline: Instant) -> Result<()> {
        let started = Instant::now();
        let mut attempts = 0u64;
        loop {
            match self.submit(descriptor, numa_node) {
                Err(AccelError::QueueBusy) => {
                    attempts += 1;
                    if attempts == 1 {
                        tracing::warn!(tag = descriptor.tag, "work queues busy, retrying submission");
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!(tag = descriptor.tag, attempts, "submission timed out");
                        return Err(AccelError::Timeout(started.elapsed()));
                    }
                    thread::sleep(BUSY_BACKOFF);
                }
                other => return other,
            }
        }
    }

    /// Inspect a descriptor's completion without waiting.
    pub fn poll<'a>(&self, descriptor: &'a Descriptor) -> Option<&'a Completion> {
        descriptor.completion().poll()
    }

    /// Wait for a descriptor's completion.
    pub fn wait<'a>(&self, descriptor: &'a Descriptor, timeout: Duration) -> Result<&'a Completion> {
        descriptor.completion().wait(timeout)
    }

    /// Write a trivial success record for `bytes_processed` bytes the host
    /// accumulated without device work.
    pub fn trivial_completion(&self, handle: &CompletionHandle, bytes_processed: usize) -> Result<OperationResult> {
        let bytes = u32::try_from(bytes_processed)
            .map_err(|_| AccelError::config("trivial completion larger than a descriptor"))?;
        let record = CompletionRecord::trivial(bytes);
        handle.complete(Completion {
            record,
            output: Vec::new(),
        });
        record.to_result()
    }
}

/// Submit, wait, and interpret the completion of one descriptor.
pub fn run_to_completion(
    dispatcher: &Dispatcher,
    descriptor: &Descriptor,
    numa_node: Option<u32>,
    deadline: Instant,
) -> Result<(OperationResult, Vec<u8>)> {
    dispatcher.submit_until(descriptor, numa_node, deadline)?;
    let budget = deadline.saturating_duration_since(Instant::now());
    let completion = descriptor.completion().wait_until(deadline, budget)?;
    let result = completion.record.to_result()?;
    Ok((result, completion.output.clone()))
}
