//! Emulated accelerator.
//!
//! Each work queue is a bounded channel serviced by worker threads. A full
//! channel is a busy queue. Workers run descriptors through the software
//! engine and publish the completion once.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use orobas_core::Operation;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::device::{Device, DeviceEnumerator, DeviceInfo};
use crate::error::{AccelError, Result};
use crate::execute::{execute, ExecutionLimits};
use crate::portal::Portal;
use crate::record::{status, Completion, CompletionRecord};
use crate::selector::QueueSelector;

/// Failure a test hook can inject into a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    PageFault { address: u64 },
    DeviceError { error_code: u8 },
    /// Run normally, then flip bits of the output.
    CorruptOutput,
}

pub type LatencyHook = Arc<dyn Fn(&Descriptor) -> Duration + Send + Sync>;
pub type FaultHook = Arc<dyn Fn(&Descriptor) -> Option<Fault> + Send + Sync>;
pub type BusyHook = Arc<dyn Fn(&Descriptor) -> bool + Send + Sync>;

/// Test hooks applied by every queue of the emulated devices.
#[derive(Clone, Default)]
pub struct EmulationHooks {
    /// Delay before a worker starts a descriptor.
    pub latency: Option<LatencyHook>,
    pub fault: Option<FaultHook>,
    /// Reject a submission as busy.
    pub busy: Option<BusyHook>,
}

impl EmulationHooks {
    pub fn with_latency(mut self, hook: impl Fn(&Descriptor) -> Duration + Send + Sync + 'static) -> Self {
        self.latency = Some(Arc::new(hook));
        self
    }

    pub fn with_fault(mut self, hook: impl Fn(&Descriptor) -> Option<Fault> + Send + Sync + 'static) -> Self {
        self.fault = Some(Arc::new(hook));
        self
    }

    pub fn with_busy(mut self, hook: impl Fn(&Descriptor) -> bool + Send + Sync + 'static) -> Self {
        self.busy = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for EmulationHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulationHooks")
            .field("latency", &self.latency.is_some())
            .field("fault", &self.fault.is_some())
            .field("busy", &self.busy.is_some())
            .finish()
    }
}

/// One emulated work queue.
pub struct EmulatedQueue {
    sender: Option<Sender<Descriptor>>,
    workers: Vec<JoinHandle<()>>,
    depth: usize,
    busy: Option<BusyHook>,
}

impl fmt::Debug for EmulatedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedQueue")
            .field("open", &self.sender.is_some())
            .field("workers", &self.workers.len())
            .field("depth", &self.depth)
            .field("busy", &self.busy.is_some())
            .finish()
    }
}

impl EmulatedQueue {
    pub fn spawn(depth: usize, workers: usize, limits: ExecutionLimits, hooks: EmulationHooks) -> Self {
        let (sender, receiver) = bounded::<Descriptor>(depth);
        let busy = hooks.busy.clone();
        let workers = (0..workers.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                let hooks = hooks.clone();
                thread::spawn(move || service(receiver, limits, hooks))
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            depth,
            busy,
        }
    }
}

impl Portal for EmulatedQueue {
    fn enqueue(&self, descriptor: &Descriptor) -> Result<()> {
        if self.busy.as_ref().is_some_and(|hook| hook(descriptor)) {
            return Err(AccelError::QueueBusy);
        }
        let sender = self.sender.as_ref().ok_or(AccelError::Device {
            status: status::DEVICE_ERROR,
            error_code: 0,
        })?;
        match sender.try_send(descriptor.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AccelError::QueueBusy),
            Err(TrySendError::Disconnected(_)) => Err(AccelError::Device {
                status: status::DEVICE_ERROR,
                error_code: 0,
            }),
        }
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for EmulatedQueue {
    fn drop(&mut self) {
        // Closing the channel ends the workers once the queue drains.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("emulated queue worker panicked");
            }
        }
    }
}

fn service(receiver: Receiver<Descriptor>, limits: ExecutionLimits, hooks: EmulationHooks) {
    for descriptor in receiver.iter() {
        if let Some(latency) = &hooks.latency {
            let delay = latency(&descriptor);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        let completion = match hooks.fault.as_ref().and_then(|hook| hook(&descriptor)) {
            Some(Fault::PageFault { address }) => {
                let mut record = CompletionRecord::with_status(status::PAGE_FAULT);
                record.fault_info = 0x01;
                record.fault_address = address;
                Completion {
                    record,
                    output: Vec::new(),
                }
            }
            Some(Fault::DeviceError { error_code }) => {
                let mut record = CompletionRecord::with_status(status::DEVICE_ERROR);
                record.error_code = error_code;
                Completion {
                    record,
                    output: Vec::new(),
                }
            }
            Some(Fault::CorruptOutput) => {
                let mut completion = execute(&descriptor, limits);
                let len = completion.output.len();
                if len > 0 {
                    completion.output[len / 2] ^= 0xA5;
                    completion.output[len - 1] ^= 0x01;
                }
                completion
            }
            None => execute(&descriptor, limits),
        };

        if !descriptor.completion().complete(completion) {
            tracing::warn!(tag = descriptor.tag, "completion already written, descriptor ran twice");
        }
    }
}

/// Work queue of an emulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub depth: usize,
    /// Operations the queue accepts; `None` accepts all.
    pub operations: Option<Vec<Operation>>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth: 32,
            operations: None,
        }
    }
}

impl QueueConfig {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = Some(operations);
        self
    }
}

/// One emulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatedDeviceConfig {
    pub numa_node: u32,
    pub socket_id: u32,
    pub max_transfer_size: usize,
    pub queues: Vec<QueueConfig>,
    /// Per-queue operation lists are honoured only when set.
    pub op_config_supported: bool,
    /// Worker threads per queue.
    pub workers: usize,
    pub generation: u8,
}

impl Default for EmulatedDeviceConfig {
    fn default() -> Self {
        Self {
            numa_node: 0,
            socket_id: 0,
            max_transfer_size: 1 << 31,
            queues: vec![QueueConfig::default()],
            op_config_supported: false,
            workers: 4,
            generation: 2,
        }
    }
}

impl EmulatedDeviceConfig {
    pub fn with_numa_node(mut self, numa_node: u32) -> Self {
        self.numa_node = numa_node;
        self.socket_id = numa_node;
        self
    }

    pub fn with_max_transfer_size(mut self, size: usize) -> Self {
        self.max_transfer_size = size;
        self
    }

    pub fn with_queues(mut self, queues: Vec<QueueConfig>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_op_config(mut self, supported: bool) -> Self {
        self.op_config_supported = supported;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_generation(mut self, generation: u8) -> Self {
        self.generation = generation;
        self
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            numa_node: self.numa_node,
            socket_id: self.socket_id,
            max_transfer_size: self.max_transfer_size,
            generation: self.generation,
        }
    }

    fn selector(&self) -> QueueSelector {
        if !self.op_config_supported {
            return QueueSelector::all(self.queues.len());
        }
        let lists: Vec<&[Operation]> = self
            .queues
            .iter()
            .map(|q| q.operations.as_deref().unwrap_or(&Operation::ALL[..]))
            .collect();
        QueueSelector::from_queue_operations(lists)
    }
}

/// Devices to emulate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub devices: Vec<EmulatedDeviceConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            devices: vec![EmulatedDeviceConfig::default()],
        }
    }
}

impl RegistryConfig {
    /// Configuration without devices.
    pub fn none() -> Self {
        Self { devices: Vec::new() }
    }

    pub fn with_device(mut self, device: EmulatedDeviceConfig) -> Self {
        self.devices.push(device);
        self
    }
}

/// Enumerator that spawns emulated devices from a [`RegistryConfig`].
#[derive(Debug, Clone, Default)]
pub struct EmulatedEnumerator {
    config: RegistryConfig,
    hooks: EmulationHooks,
}

impl EmulatedEnumerator {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            hooks: EmulationHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: EmulationHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl DeviceEnumerator for EmulatedEnumerator {
    fn enumerate(&self) -> Result<Vec<Device>> {
        self.config
            .devices
            .iter()
            .enumerate()
            .map(|(id, device)| {
                if device.queues.len() > QueueSelector::MAX_QUEUES {
                    return Err(AccelError::config(format!(
                        "device {id} declares {} queues",
                        device.queues.len()
                    )));
                }
                let info = device.info();
                let queues: Vec<Box<dyn Portal>> = device
                    .queues
                    .iter()
                    .map(|q| {
                        Box::new(EmulatedQueue::spawn(q.depth, device.workers, info.limits(), self.hooks.clone()))
                            as Box<dyn Portal>
                    })
                    .collect();
                tracing::debug!(device = id, numa_node = info.numa_node, queues = queues.len(), "emulated device up");
                Device::new(id, info, queues, device.selector())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use orobas_core::{CompressionMode, Framing, JobFlags};
    use orobas_deflate::CompressOptions;

    use crate::device::DeviceRegistry;

    fn compress_descriptor(input: &[u8], tag: u64) -> Descriptor {
        Descriptor::compress(
            CompressOptions::new(CompressionMode::Fixed, Framing::Raw),
            JobFlags::FIRST | JobFlags::LAST,
            Arc::from(input),
            input.len() + 64,
        )
        .with_tag(tag)
    }

    #[test]
    fn test_config_serde() {
        let config = RegistryConfig::none().with_device(
            EmulatedDeviceConfig::default()
                .with_numa_node(1)
                .with_op_config(true)
                .with_queues(vec![QueueConfig::default().with_operations(vec![Operation::Compress])]),
        );
        let json = serde_json::to_string(&config).unwrap();
        let back: RegistryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let sparse: EmulatedDeviceConfig = serde_json::from_str(r#"{"generation": 1}"#).unwrap();
        assert_eq!(sparse.generation, 1);
        assert_eq!(sparse.queues.len(), 1);
    }

    #[test]
    fn test_op_config_selector() {
        let config = EmulatedDeviceConfig::default().with_op_config(true).with_queues(vec![
            QueueConfig::default().with_operations(vec![Operation::Decompress]),
            QueueConfig::default(),
        ]);
        let selector = config.selector();
        assert_eq!(selector.mask(Operation::Decompress).count(), 2);
        assert_eq!(selector.mask(Operation::Compress).count(), 1);
        let flat = config.with_op_config(false).selector();
        assert_eq!(flat.mask(Operation::Compress).count(), 2);
    }

    #[test]
    fn test_completes_each_descriptor_once() {
        let registry = DeviceRegistry::discover(&EmulatedEnumerator::new(RegistryConfig::default())).unwrap();
        let descriptors: Vec<_> = (0..8).map(|i| compress_descriptor(&[i as u8; 1000], i)).collect();
        for d in &descriptors {
            registry.submit(d, None).unwrap();
        }
        for d in &descriptors {
            let completion = d.completion().wait(Duration::from_secs(10)).unwrap();
            assert_eq!(completion.record.status, status::SUCCESS);
            assert_eq!(completion.record.bytes_completed, 1000);
        }
    }

    #[test]
    fn test_full_queue_is_busy() {
        let hooks = EmulationHooks::default().with_latency(|_| Duration::from_millis(200));
        let config = RegistryConfig::none().with_device(
            EmulatedDeviceConfig::default()
                .with_workers(1)
                .with_queues(vec![QueueConfig::default().with_depth(1)]),
        );
        let registry = DeviceRegistry::discover(&EmulatedEnumerator::new(config).with_hooks(hooks)).unwrap();

        let mut busy = 0;
        for tag in 0..4 {
            match registry.submit(&compress_descriptor(b"abc", tag), None) {
                Ok(()) => {}
                Err(AccelError::QueueBusy) => busy += 1,
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert!(busy >= 1);
    }

    #[test]
    fn test_fault_injection() {
        let hooks = EmulationHooks::default().with_fault(|d| {
            (d.tag == 1).then_some(Fault::PageFault { address: 0x4000 })
        });
        let registry = DeviceRegistry::discover(&EmulatedEnumerator::new(RegistryConfig::default()).with_hooks(hooks)).unwrap();
        let ok = compress_descriptor(b"fine", 0);
        let faulted = compress_descriptor(b"fault", 1);
        registry.submit(&ok, None).unwrap();
        registry.submit(&faulted, None).unwrap();
        assert!(ok.completion().wait(Duration::from_secs(10)).unwrap().record.to_result().is_ok());
        let record = faulted.completion().wait(Duration::from_secs(10)).unwrap().record;
        assert!(matches!(
            record.to_result(),
            Err(AccelError::PageFault { address: 0x4000, .. })
        ));
    }

    #[test]
    fn test_queue_debug_hides_hooks() {
        let hooks = EmulationHooks::default().with_busy(|_| false);
        let queue = EmulatedQueue::spawn(
            4,
            1,
            ExecutionLimits {
                generation: 2,
                max_transfer_size: 1 << 20,
            },
            hooks,
        );
        let text = format!("{queue:?}");
        assert!(text.contains("depth: 4"));
        assert!(text.contains("busy: true"));
    }

    #[test]
    fn test_busy_hook() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rejected);
        let hooks = EmulationHooks::default().with_busy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let registry = DeviceRegistry::discover(&EmulatedEnumerator::new(RegistryConfig::default()).with_hooks(hooks)).unwrap();
        assert!(matches!(
            registry.submit(&compress_descriptor(b"x", 0), None),
            Err(AccelError::QueueBusy)
        ));
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }
}
