//! Work descriptors.
//!
//! A descriptor references its input, the room the device may write and
//! the completion slot. Cloning is cheap; a descriptor rejected with
//! [`QueueBusy`](crate::AccelError::QueueBusy) is resubmitted as is.

use std::sync::{Arc, Mutex};

use orobas_core::{Crc64Params, FilterSpec, JobFlags, Operation};
use orobas_deflate::{CompressOptions, CompressState, InflateOptions, InflateState};

use crate::record::CompletionHandle;

/// Operation-specific descriptor fields.
#[derive(Debug, Clone)]
pub enum Payload {
    Compress {
        options: CompressOptions,
        /// State record carried between descriptors of one stream.
        state: Option<Arc<Mutex<CompressState>>>,
    },
    Decompress {
        options: InflateOptions,
        state: Option<Arc<Mutex<InflateState>>>,
    },
    Crc64(Crc64Params),
    Filter(FilterSpec),
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub payload: Payload,
    pub flags: JobFlags,
    pub input: Arc<[u8]>,
    /// Bytes the device may write.
    pub output_capacity: usize,
    /// Caller-chosen identifier, e.g. a chunk index.
    pub tag: u64,
    completion: CompletionHandle,
}

impl Descriptor {
    pub fn new(payload: Payload, flags: JobFlags, input: Arc<[u8]>, output_capacity: usize) -> Self {
        Self {
            payload,
            flags,
            input,
            output_capacity,
            tag: 0,
            completion: CompletionHandle::new(),
        }
    }

    /// Stateless compression of `input`.
    pub fn compress(options: CompressOptions, flags: JobFlags, input: Arc<[u8]>, output_capacity: usize) -> Self {
        Self::new(Payload::Compress { options, state: None }, flags, input, output_capacity)
    }

    /// Stateless decompression of a whole stream.
    pub fn decompress(options: InflateOptions, flags: JobFlags, input: Arc<[u8]>, output_capacity: usize) -> Self {
        Self::new(Payload::Decompress { options, state: None }, flags, input, output_capacity)
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    pub fn operation(&self) -> Operation {
        match &self.payload {
            Payload::Compress { .. } => Operation::Compress,
            Payload::Decompress { .. } => Operation::Decompress,
            Payload::Crc64(_) => Operation::Crc64,
            Payload::Filter(spec) => spec.operation(),
        }
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(JobFlags::LAST)
    }

    pub fn completion(&self) -> &CompletionHandle {
        &self.completion
    }
}
