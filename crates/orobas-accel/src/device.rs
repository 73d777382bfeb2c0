//! Devices and the registry built once at start-up.

use std::sync::atomic::{AtomicUsize, Ordering};

use orobas_core::Operation;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::error::{AccelError, Result};
use crate::execute::ExecutionLimits;
use crate::portal::Portal;
use crate::selector::QueueSelector;

/// Static attributes of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub numa_node: u32,
    pub socket_id: u32,
    /// Largest input a single descriptor may reference.
    pub max_transfer_size: usize,
    /// Hardware generation; BE16 compression needs 2 or later.
    pub generation: u8,
}

impl DeviceInfo {
    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            generation: self.generation,
            max_transfer_size: self.max_transfer_size,
        }
    }
}

/// A device with its work queues.
#[derive(Debug)]
pub struct Device {
    id: usize,
    info: DeviceInfo,
    queues: Vec<Box<dyn Portal>>,
    selector: QueueSelector,
    next_queue: AtomicUsize,
}

impl Device {
    pub fn new(id: usize, info: DeviceInfo, queues: Vec<Box<dyn Portal>>, selector: QueueSelector) -> Result<Self> {
        if queues.len() > QueueSelector::MAX_QUEUES {
            return Err(AccelError::config(format!(
                "device {id} has {} queues, at most {} are addressable",
                queues.len(),
                QueueSelector::MAX_QUEUES
            )));
        }
        Ok(Self {
            id,
            info,
            queues,
            selector,
            next_queue: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn selector(&self) -> &QueueSelector {
        &self.selector
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.selector.supports(op)
    }

    /// Post to the next queue, round-robin, that accepts the operation.
    /// Busy queues are skipped; busy is returned only if all of them are.
    pub fn enqueue(&self, descriptor: &Descriptor) -> Result<()> {
        let op = descriptor.operation();
        let mask = self.selector.mask(op);
        if mask.is_empty() || self.queues.is_empty() {
            return Err(AccelError::NoDevice(op.name()));
        }

        let start = self.next_queue.fetch_add(1, Ordering::Relaxed);
        for k in 0..self.queues.len() {
            let index = (start + k) % self.queues.len();
            if !mask.get(index) {
                continue;
            }
            match self.queues[index].enqueue(descriptor) {
                Ok(()) => {
                    tracing::debug!(device = self.id, queue = index, op = op.name(), tag = descriptor.tag, "descriptor posted");
                    return Ok(());
                }
                Err(AccelError::QueueBusy) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AccelError::QueueBusy)
    }
}

/// Source of devices, standing in for the driver's enumeration.
pub trait DeviceEnumerator {
    fn enumerate(&self) -> Result<Vec<Device>>;
}

/// All devices, read-only after discovery.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    next_device: AtomicUsize,
}

impl DeviceRegistry {
    /// Enumerate devices once.
    pub fn discover(enumerator: &dyn DeviceEnumerator) -> Result<Self> {
        let devices = enumerator.enumerate()?;
        tracing::info!(
            devices = devices.len(),
            queues = devices.iter().map(Device::queue_count).sum::<usize>(),
            "accelerator discovery complete"
        );
        Ok(Self {
            devices,
            next_device: AtomicUsize::new(0),
        })
    }

    /// Registry with no devices; every submission reports `NoDevice`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices on `numa_node`, or all of them.
    pub fn devices_on(&self, numa_node: Option<u32>) -> impl Iterator<Item = &Device> + '_ {
        self.devices
            .iter()
            .filter(move |d| numa_node.map_or(true, |node| d.info.numa_node == node))
    }

    pub fn supports(&self, op: Operation, numa_node: Option<u32>) -> bool {
        self.devices_on(numa_node).any(|d| d.supports(op))
    }

    /// Smallest max transfer size among the matching devices.
    pub fn min_max_transfer_size(&self, numa_node: Option<u32>) -> Option<usize> {
        self.devices_on(numa_node).map(|d| d.info.max_transfer_size).min()
    }

    /// Oldest generation among the matching devices.
    pub fn min_generation(&self, numa_node: Option<u32>) -> Option<u8> {
        self.devices_on(numa_node).map(|d| d.info.generation).min()
    }

    /// Post `descriptor` to a matching device, round-robin over devices.
    pub fn submit(&self, descriptor: &Descriptor, numa_node: Option<u32>) -> Result<()> {
        let op = descriptor.operation();
        let candidates: Vec<&Device> = self.devices_on(numa_node).filter(|d| d.supports(op)).collect();
        if candidates.is_empty() {
            return Err(AccelError::NoDevice(op.name()));
        }

        let start = self.next_device.fetch_add(1, Ordering::Relaxed);
        for k in 0..candidates.len() {
            let device = candidates[(start + k) % candidates.len()];
            match device.enqueue(descriptor) {
                Err(AccelError::QueueBusy) => continue,
                other => return other,
            }
        }
        Err(AccelError::QueueBusy)
    }
}
