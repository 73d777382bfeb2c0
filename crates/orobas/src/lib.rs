//! # Orobas
//!
//! DEFLATE compression over two interchangeable backends: a resumable
//! software engine and an asynchronous accelerator reached through a
//! [`Dispatcher`]. This crate ties them together.
//!
//! - [`Job`] runs one operation call by call over caller buffers, choosing
//!   the backend when a stream starts.
//! - [`compress_stream`] drives one job over the chunks of a large input
//!   and produces a single standard stream.
//! - [`compress_container`] compresses chunks independently, in parallel
//!   accelerator slots, into a container whose header keeps the chunk
//!   boundaries.
//!
//! ## Quick Start
//!
//! ```
//! use orobas::{Orobas, OrchestratorConfig};
//!
//! let orobas = Orobas::new(OrchestratorConfig::default());
//! let data = b"Hello, Orobas! Hello, Orobas! Hello, Orobas!".repeat(100);
//! let container = orobas.compress(&data)?;
//! assert_eq!(orobas.decompress(&container)?, data);
//! # Ok::<(), orobas::Error>(())
//! ```

pub mod aggregate;
pub mod chunk;
pub mod config;
pub mod container;
pub mod error;
pub mod job;
pub mod parallel;
pub mod stream;

use std::sync::Arc;

pub use aggregate::CrcAggregator;
pub use chunk::{estimate_compressed_size, ChunkPlan};
pub use config::OrchestratorConfig;
pub use container::ContainerHeader;
pub use error::{Error, Result};
pub use job::{Job, DEFAULT_JOB_TIMEOUT};
pub use parallel::{
    compress_container, compress_container_into, container_layout, decompress_container, ContainerLayout,
    ContainerStats,
};
pub use stream::{compress_stream, decompress_stream, decompress_stream_chunked, plan_chunks, StreamOutput};

pub use orobas_accel::{AccelError, Dispatcher};
pub use orobas_core::{
    ByteSink, ByteSource, CompressionLevel, CompressionMode, ExecutionPath, Framing, JobFlags, Operation,
    OperationResult, Status,
};

/// A configuration bound to an optional accelerator.
#[derive(Debug, Clone, Default)]
pub struct Orobas {
    config: OrchestratorConfig,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl Orobas {
    /// Software only until a dispatcher is attached.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_deref()
    }

    /// Compress into a container.
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        compress_container(input, &self.config, self.dispatcher()).map(|(data, _)| data)
    }

    /// Decompress a container.
    pub fn decompress(&self, container: &[u8]) -> Result<Vec<u8>> {
        decompress_container(container, &self.config, self.dispatcher()).map(|(data, _)| data)
    }

    /// Compress into one stream of the configured framing.
    pub fn compress_stream(&self, input: &[u8]) -> Result<StreamOutput> {
        compress_stream(input, &self.config, self.dispatcher())
    }

    pub fn decompress_stream(&self, stream: &[u8]) -> Result<Vec<u8>> {
        decompress_stream(stream, &self.config, self.dispatcher())
    }

    /// Output buffer a container of `source_len` bytes needs.
    pub fn container_capacity(&self, source_len: usize) -> Result<usize> {
        container_layout(source_len, &self.config, self.dispatcher()).map(|layout| layout.capacity())
    }

    /// Single-shot compression job configured like this instance.
    pub fn compress_job(&self) -> Job {
        let flags = self.config.mode_flags() | self.config.framing.flags() | JobFlags::FIRST | JobFlags::LAST;
        self.configure(Job::compress()).with_flags(flags)
    }

    pub fn decompress_job(&self) -> Job {
        let mut flags = self.config.framing.flags() | JobFlags::FIRST | JobFlags::LAST;
        if self.config.mode == CompressionMode::Canned {
            flags |= JobFlags::CANNED_MODE;
        }
        self.configure(Job::decompress()).with_flags(flags)
    }

    fn configure(&self, job: Job) -> Job {
        let job = job
            .with_path(self.config.path)
            .with_level(self.config.level)
            .with_numa_node(self.config.numa_node)
            .with_timeout(self.config.timeout);
        match &self.config.table {
            Some(table) => job.with_table(table.clone()),
            None => job,
        }
    }
}
