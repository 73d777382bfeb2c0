//! # Orobas Accel
//!
//! The hardware side of Orobas: devices are discovered once into a
//! [`DeviceRegistry`], work is posted as [`Descriptor`]s to per-opcode
//! capable queues, and every accepted descriptor is answered by exactly one
//! 64-byte [`CompletionRecord`] that the host polls or waits on.
//!
//! Driver bootstrap sits behind [`DeviceEnumerator`]. The bundled
//! [`EmulatedEnumerator`] backs each queue with worker threads that run the
//! software engine, so its output is byte-identical to the software path.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! use orobas_accel::{run_to_completion, Descriptor, Dispatcher, EmulatedEnumerator, RegistryConfig};
//! use orobas_core::JobFlags;
//! use orobas_deflate::CompressOptions;
//!
//! let dispatcher = Dispatcher::discover(&EmulatedEnumerator::new(RegistryConfig::default()))?;
//! let input: Arc<[u8]> = Arc::from(&b"offload me, offload me"[..]);
//! let descriptor = Descriptor::compress(
//!     CompressOptions::default(),
//!     JobFlags::FIRST | JobFlags::LAST,
//!     Arc::clone(&input),
//!     1024,
//! );
//! let deadline = Instant::now() + Duration::from_secs(5);
//! let (result, stream) = run_to_completion(&dispatcher, &descriptor, None, deadline)?;
//! assert_eq!(result.consumed, input.len());
//! assert_eq!(result.produced, stream.len());
//! # Ok::<(), orobas_accel::AccelError>(())
//! ```

pub mod descriptor;
pub mod device;
pub mod dispatcher;
pub mod emulated;
pub mod error;
pub mod execute;
pub mod portal;
pub mod record;
pub mod selector;

pub use descriptor::{Descriptor, Payload};
pub use device::{Device, DeviceEnumerator, DeviceInfo, DeviceRegistry};
pub use dispatcher::{run_to_completion, Dispatcher};
pub use emulated::{
    EmulatedDeviceConfig, EmulatedEnumerator, EmulatedQueue, EmulationHooks, Fault, QueueConfig,
    RegistryConfig,
};
pub use error::{AccelError, Result};
pub use execute::ExecutionLimits;
pub use portal::Portal;
pub use record::{Completion, CompletionHandle, CompletionRecord, RECORD_SIZE};
pub use selector::QueueSelector;
