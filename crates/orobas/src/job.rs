//! Jobs: one compress, decompress, CRC64 or filter operation driven over
//! caller buffers, call by call.
//!
//! A job picks its backend when a stream starts and keeps it until the
//! stream is done. An auto job that the accelerator cannot take is moved to
//! software only at that point, or for single-shot operations; a stream
//! that already runs on the accelerator is never moved.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use orobas_accel::{run_to_completion, AccelError, CompletionHandle, Descriptor, Dispatcher, Payload};
use orobas_core::bits::reverse_words16;
use orobas_core::{
    crc32, crc64, run_filter, xor_checksum, ByteSink, ByteSource, CompressionLevel, CompressionMode,
    Crc64Params, ExecutionPath, FilterSpec, Framing, JobFlags, Operation, OperationResult, Status,
};
use orobas_deflate::{
    be16_adjust, compress, is_verification_enabled, to_be16, verify_stream, CompressOptions,
    CompressState, HuffmanTable, InflateOptions, InflateState, Verifier,
};

use crate::error::{Error, Result};

/// Default wait budget of a single call.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum JobKind {
    Compress,
    Decompress,
    Crc64(Crc64Params),
    Filter(FilterSpec),
}

/// Backend sub-state of a running stream.
#[derive(Debug)]
enum Stream {
    Idle,
    SoftwareCompress(Box<CompressState>),
    SoftwareInflate(Box<InflateState>),
    HardwareCompress {
        state: Arc<Mutex<CompressState>>,
        options: CompressOptions,
    },
    HardwareInflate {
        state: Arc<Mutex<InflateState>>,
        options: InflateOptions,
    },
}

/// Caller-owned job state.
#[derive(Debug)]
pub struct Job {
    kind: JobKind,
    /// Backend selection.
    pub path: ExecutionPath,
    /// Flags of the next call.
    pub flags: JobFlags,
    pub level: CompressionLevel,
    pub table: Option<Arc<HuffmanTable>>,
    pub numa_node: Option<u32>,
    /// Wait budget of each accelerator call.
    pub timeout: Duration,

    stream: Stream,
    verifier: Option<Verifier>,
    backend: Option<ExecutionPath>,
    total_in: u64,
    total_out: u64,
    last: OperationResult,
}

impl Job {
    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            path: ExecutionPath::Auto,
            flags: JobFlags::FIRST | JobFlags::LAST,
            level: CompressionLevel::Default,
            table: None,
            numa_node: None,
            timeout: DEFAULT_JOB_TIMEOUT,
            stream: Stream::Idle,
            verifier: None,
            backend: None,
            total_in: 0,
            total_out: 0,
            last: OperationResult::default(),
        }
    }

    pub fn compress() -> Self {
        Self::new(JobKind::Compress)
    }

    pub fn decompress() -> Self {
        Self::new(JobKind::Decompress)
    }

    pub fn crc64(params: Crc64Params) -> Self {
        Self::new(JobKind::Crc64(params))
    }

    pub fn filter(spec: FilterSpec) -> Self {
        Self::new(JobKind::Filter(spec))
    }

    pub fn with_path(mut self, path: ExecutionPath) -> Self {
        self.path = path;
        self
    }

    pub fn with_flags(mut self, flags: JobFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_table(mut self, table: Arc<HuffmanTable>) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_numa_node(mut self, numa_node: Option<u32>) -> Self {
        self.numa_node = numa_node;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn operation(&self) -> Operation {
        match &self.kind {
            JobKind::Compress => Operation::Compress,
            JobKind::Decompress => Operation::Decompress,
            JobKind::Crc64(_) => Operation::Crc64,
            JobKind::Filter(spec) => spec.operation(),
        }
    }

    /// Whole operation in one call: FIRST and LAST, or a stateless opcode.
    pub fn is_single_shot(&self) -> bool {
        self.flags.is_single_shot() || matches!(self.kind, JobKind::Crc64(_) | JobKind::Filter(_))
    }

    /// Whether the next call may still be moved from the accelerator to
    /// software.
    pub fn is_fallback_eligible(&self) -> bool {
        self.path == ExecutionPath::Auto && (self.flags.contains(JobFlags::FIRST) || self.is_single_shot())
    }

    /// Whether a stream is suspended between calls.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self.stream, Stream::Idle)
    }

    /// Backend of the current or most recent stream.
    pub fn backend(&self) -> Option<ExecutionPath> {
        self.backend
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Result of the most recent call.
    pub fn last_result(&self) -> &OperationResult {
        &self.last
    }

    /// Abandon any stream in progress.
    pub fn reset(&mut self) {
        self.stream = Stream::Idle;
        self.verifier = None;
        self.total_in = 0;
        self.total_out = 0;
        self.last = OperationResult::default();
    }

    /// Run one call over `src` and `dst`.
    ///
    /// A stream starts on the first call after creation, after [`Job::reset`]
    /// or after the previous stream finished. Errors leave both cursors where
    /// they were.
    pub fn execute(
        &mut self,
        dispatcher: Option<&Dispatcher>,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
    ) -> Result<OperationResult> {
        let in_start = src.position();
        let out_start = dst.position();

        let outcome = match self.kind {
            JobKind::Compress => self.execute_compress(dispatcher, src, dst),
            JobKind::Decompress => self.execute_decompress(dispatcher, src, dst),
            JobKind::Crc64(_) | JobKind::Filter(_) => self.execute_stateless(dispatcher, src, dst),
        };

        match outcome {
            Ok(result) => {
                self.total_in += result.consumed as u64;
                self.total_out += result.produced as u64;
                self.last = result;
                Ok(result)
            }
            Err(e) => {
                src.rewind_to(in_start);
                dst.rollback(out_start);
                self.stream = Stream::Idle;
                self.verifier = None;
                tracing::debug!(op = self.operation().name(), error = %e, "job failed");
                Err(e)
            }
        }
    }

    /// Reason the accelerator cannot run the next call, if any.
    fn hardware_check(&self, dispatcher: Option<&Dispatcher>, input_len: usize) -> std::result::Result<(), AccelError> {
        let op = self.operation();
        let dispatcher = dispatcher
            .filter(|d| d.supports(op, self.numa_node))
            .ok_or(AccelError::NoDevice(op.name()))?;

        if op == Operation::Compress {
            if self.level == CompressionLevel::High {
                return Err(AccelError::config("high compression level runs on software only"));
            }
            if self.flags.contains(JobFlags::BIG_ENDIAN) && dispatcher.min_generation(self.numa_node).unwrap_or(0) < 2 {
                return Err(AccelError::config("BE16 compression needs a generation 2 device"));
            }
        }
        if let Some(max) = dispatcher.max_transfer_size(self.numa_node) {
            if input_len > max {
                return Err(AccelError::config(format!(
                    "input of {input_len} bytes exceeds the device transfer size of {max}"
                )));
            }
        }
        Ok(())
    }

    /// Backend for a starting stream or a single-shot call.
    fn select_backend(&self, dispatcher: Option<&Dispatcher>, input_len: usize) -> Result<ExecutionPath> {
        match self.path {
            ExecutionPath::Software => Ok(ExecutionPath::Software),
            ExecutionPath::Hardware => {
                self.hardware_check(dispatcher, input_len).map_err(Error::from_accel)?;
                Ok(ExecutionPath::Hardware)
            }
            ExecutionPath::Auto => match self.hardware_check(dispatcher, input_len) {
                Ok(()) => Ok(ExecutionPath::Hardware),
                Err(e) if e.is_fallback_eligible() => {
                    tracing::debug!(op = self.operation().name(), reason = %e, "running on software");
                    Ok(ExecutionPath::Software)
                }
                Err(e) => Err(Error::from_accel(e)),
            },
        }
    }

    fn compress_options(&self) -> Result<CompressOptions> {
        Ok(CompressOptions::from_flags(self.flags, self.level, self.table.clone())?)
    }

    fn start_compress(&mut self, backend: ExecutionPath) -> Result<()> {
        let options = self.compress_options()?;
        let big_endian = self.flags.contains(JobFlags::BIG_ENDIAN);
        if big_endian && !self.flags.is_single_shot() {
            return Err(Error::config("BE16 output requires a single-shot job"));
        }

        let state = CompressState::new(options.clone())?;
        self.stream = match backend {
            ExecutionPath::Hardware => Stream::HardwareCompress {
                state: Arc::new(Mutex::new(state)),
                options: options.clone(),
            },
            _ => Stream::SoftwareCompress(Box::new(state)),
        };
        self.verifier = if is_verification_enabled(self.flags, options.mode) {
            Some(Verifier::new(&options, big_endian)?)
        } else {
            None
        };
        self.backend = Some(backend);
        self.total_in = 0;
        self.total_out = 0;
        Ok(())
    }

    fn execute_compress(
        &mut self,
        dispatcher: Option<&Dispatcher>,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
    ) -> Result<OperationResult> {
        let in_start = src.position();
        let out_start = dst.position();
        let starting = !self.is_in_progress();
        if starting {
            let backend = self.select_backend(dispatcher, src.available())?;
            self.start_compress(backend)?;
        }

        let mut result = match self.compress_on_backend(dispatcher, src, dst) {
            Ok(result) => result,
            Err(Error::Accel(e)) if e.is_fallback_eligible() => {
                src.rewind_to(in_start);
                dst.rollback(out_start);
                if !(starting && self.is_fallback_eligible()) {
                    return Err(Error::MidStreamFallback);
                }
                tracing::warn!(reason = %e, "accelerator rejected the stream, falling back to software");
                self.start_compress(ExecutionPath::Software)?;
                self.compress_on_backend(dispatcher, src, dst)?
            }
            Err(e) => return Err(e),
        };

        if result.status == Status::MoreOutputNeeded && self.flags.is_single_shot() {
            src.rewind_to(in_start);
            dst.rollback(out_start);
            self.stream = Stream::Idle;
            return self.recover_stored(src, dst);
        }

        if let Some(verifier) = self.verifier.as_mut() {
            let produced = &dst.written()[out_start..out_start + result.produced];
            verifier.update(produced, result.status == Status::Done, result.crc32)?;
        }

        if result.status == Status::Done {
            self.stream = Stream::Idle;
            self.verifier = None;
        } else {
            result.last_bit_offset = 0;
        }
        Ok(result)
    }

    fn compress_on_backend(
        &mut self,
        dispatcher: Option<&Dispatcher>,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
    ) -> Result<OperationResult> {
        let last = self.flags.contains(JobFlags::LAST);
        match &mut self.stream {
            Stream::SoftwareCompress(state) => {
                let out_start = dst.position();
                let mut result = state.step(src, dst, last)?;
                if self.flags.contains(JobFlags::BIG_ENDIAN) && result.status == Status::Done {
                    pack_be16(dst, out_start, &mut result);
                }
                Ok(result)
            }
            Stream::HardwareCompress { state, options } => {
                let dispatcher = dispatcher.ok_or(AccelError::NoDevice("compress"))?;

                if !last {
                    let mut guard = lock(&**state)?;
                    if guard.can_absorb(src.available()) {
                        let taken = src.take(src.available());
                        guard.absorb(taken)?;
                        let handle = CompletionHandle::new();
                        let mut result = dispatcher.trivial_completion(&handle, taken.len())?;
                        result.crc32 = guard.crc32();
                        result.xor_checksum = guard.xor_checksum();
                        return Ok(result);
                    }
                }

                let payload = Payload::Compress {
                    options: options.clone(),
                    state: Some(Arc::clone(state)),
                };
                let descriptor = Descriptor::new(payload, self.flags, Arc::from(src.remaining()), dst.available())
                    .with_tag(self.total_in);
                run_descriptor(dispatcher, &descriptor, self.numa_node, self.timeout, src, dst)
            }
            _ => Err(invalid_stream("compress")),
        }
    }

    /// Rewrite a single-shot compression as stored blocks when the coded
    /// stream did not fit. Cursors stay put if that does not fit either.
    fn recover_stored(&mut self, src: &mut ByteSource<'_>, dst: &mut ByteSink<'_>) -> Result<OperationResult> {
        let options = self.compress_options()?;
        if options.mode == CompressionMode::Canned {
            return Ok(more_output());
        }
        let input = src.remaining();
        let stored = CompressOptions::new(CompressionMode::Stored, options.framing).with_level(options.level);
        let mut stream = compress(input, stored.clone())?;
        let mut last_bit_offset = 0;
        let big_endian = self.flags.contains(JobFlags::BIG_ENDIAN);
        if big_endian {
            let (len, bits) = be16_adjust(stream.len(), 0);
            to_be16(&mut stream);
            debug_assert_eq!(len, stream.len());
            last_bit_offset = bits;
        }
        if stream.len() > dst.available() {
            return Ok(more_output());
        }

        let crc = crc32(input);
        if is_verification_enabled(self.flags, CompressionMode::Stored) {
            verify_stream(&stream, &stored, big_endian, crc)?;
        }
        dst.write(&stream)?;
        src.advance(input.len())?;
        tracing::debug!(input = input.len(), output = stream.len(), "coded stream too large, wrote stored blocks");
        Ok(OperationResult {
            status: Status::Done,
            consumed: input.len(),
            produced: stream.len(),
            last_bit_offset,
            crc32: crc,
            xor_checksum: xor_checksum(input),
            ..OperationResult::default()
        })
    }

    fn start_decompress(&mut self, backend: ExecutionPath) -> Result<()> {
        let mut options = InflateOptions::new(Framing::from_flags(self.flags)?)
            .with_big_endian(self.flags.contains(JobFlags::BIG_ENDIAN));
        if self.flags.contains(JobFlags::CANNED_MODE) {
            let table = self
                .table
                .clone()
                .ok_or_else(|| Error::config("canned mode requires a huffman table"))?;
            options = options.with_canned(table);
        }
        let state = InflateState::new(options.clone())?;
        self.stream = match backend {
            ExecutionPath::Hardware => Stream::HardwareInflate {
                state: Arc::new(Mutex::new(state)),
                options,
            },
            _ => Stream::SoftwareInflate(Box::new(state)),
        };
        self.backend = Some(backend);
        self.total_in = 0;
        self.total_out = 0;
        Ok(())
    }

    fn execute_decompress(
        &mut self,
        dispatcher: Option<&Dispatcher>,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
    ) -> Result<OperationResult> {
        let in_start = src.position();
        let out_start = dst.position();
        let starting = !self.is_in_progress();
        if starting {
            let backend = self.select_backend(dispatcher, src.available())?;
            self.start_decompress(backend)?;
        }

        let result = match self.inflate_on_backend(dispatcher, src, dst) {
            Ok(result) => result,
            Err(Error::Accel(e)) if e.is_fallback_eligible() => {
                src.rewind_to(in_start);
                dst.rollback(out_start);
                if !(starting && self.is_fallback_eligible()) {
                    return Err(Error::MidStreamFallback);
                }
                tracing::warn!(reason = %e, "accelerator rejected the stream, falling back to software");
                self.start_decompress(ExecutionPath::Software)?;
                self.inflate_on_backend(dispatcher, src, dst)?
            }
            Err(e) => return Err(e),
        };

        if result.status == Status::Done {
            self.stream = Stream::Idle;
        }
        Ok(result)
    }

    fn inflate_on_backend(
        &mut self,
        dispatcher: Option<&Dispatcher>,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
    ) -> Result<OperationResult> {
        let last = self.flags.contains(JobFlags::LAST);
        match &mut self.stream {
            Stream::SoftwareInflate(state) => Ok(state.step(src, dst, last)?),
            Stream::HardwareInflate { state, options } => {
                let dispatcher = dispatcher.ok_or(AccelError::NoDevice("decompress"))?;
                let payload = Payload::Decompress {
                    options: options.clone(),
                    state: Some(Arc::clone(state)),
                };
                let descriptor = Descriptor::new(payload, self.flags, Arc::from(src.remaining()), dst.available())
                    .with_tag(self.total_in);
                run_descriptor(dispatcher, &descriptor, self.numa_node, self.timeout, src, dst)
            }
            _ => Err(invalid_stream("decompress")),
        }
    }

    fn execute_stateless(
        &mut self,
        dispatcher: Option<&Dispatcher>,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
    ) -> Result<OperationResult> {
        let backend = self.select_backend(dispatcher, src.available())?;
        self.backend = Some(backend);

        if let (ExecutionPath::Hardware, Some(dispatcher)) = (backend, dispatcher) {
            let payload = match &self.kind {
                JobKind::Crc64(params) => Payload::Crc64(*params),
                JobKind::Filter(spec) => Payload::Filter(spec.clone()),
                _ => return Err(invalid_stream("stateless operation")),
            };
            let descriptor = Descriptor::new(payload, self.flags, Arc::from(src.remaining()), dst.available());
            match run_descriptor(dispatcher, &descriptor, self.numa_node, self.timeout, src, dst) {
                Err(Error::Accel(e)) if e.is_fallback_eligible() && self.path == ExecutionPath::Auto => {
                    tracing::warn!(reason = %e, "accelerator rejected the job, falling back to software");
                    self.backend = Some(ExecutionPath::Software);
                }
                other => return other,
            }
        }

        let input = src.remaining();
        match &self.kind {
            JobKind::Crc64(params) => {
                src.advance(input.len())?;
                Ok(OperationResult {
                    status: Status::Done,
                    consumed: input.len(),
                    crc64: crc64(input, *params),
                    ..OperationResult::default()
                })
            }
            JobKind::Filter(spec) => {
                let mut output = Vec::with_capacity(spec.max_output_len(input.len()));
                let aggregates = run_filter(spec, input, &mut output)?;
                if output.len() > dst.available() {
                    return Ok(more_output());
                }
                dst.write(&output)?;
                src.advance(input.len())?;
                Ok(OperationResult {
                    status: Status::Done,
                    consumed: input.len(),
                    produced: output.len(),
                    aggregates,
                    ..OperationResult::default()
                })
            }
            _ => Err(invalid_stream("stateless operation")),
        }
    }
}

/// Submit, wait, and move the completion's bytes through the cursors.
fn run_descriptor(
    dispatcher: &Dispatcher,
    descriptor: &Descriptor,
    numa_node: Option<u32>,
    timeout: Duration,
    src: &mut ByteSource<'_>,
    dst: &mut ByteSink<'_>,
) -> Result<OperationResult> {
    let deadline = Instant::now() + timeout;
    let (result, output) = run_to_completion(dispatcher, descriptor, numa_node, deadline).map_err(Error::from_accel)?;
    dst.write(&output)?;
    src.advance(result.consumed)?;
    Ok(result)
}

/// Pad and word-reverse the bytes written since `out_start`. Without room
/// for the pad byte the result turns into more-output-needed.
fn pack_be16(dst: &mut ByteSink<'_>, out_start: usize, result: &mut OperationResult) {
    let (len, bits) = be16_adjust(result.produced, result.last_bit_offset);
    if len > result.produced && dst.write(&[0]).is_err() {
        result.status = Status::MoreOutputNeeded;
        return;
    }
    reverse_words16(&mut dst.written_mut()[out_start..]);
    result.produced = len;
    result.last_bit_offset = bits;
}

fn lock<S>(state: &Mutex<S>) -> Result<MutexGuard<'_, S>> {
    state.lock().map_err(|_| {
        Error::Engine(orobas_core::Error::InvalidState {
            expected: "usable state record",
            actual: "state record poisoned",
        })
    })
}

fn invalid_stream(expected: &'static str) -> Error {
    Error::Engine(orobas_core::Error::InvalidState {
        expected,
        actual: "stream of another operation",
    })
}

fn more_output() -> OperationResult {
    OperationResult {
        status: Status::MoreOutputNeeded,
        ..OperationResult::default()
    }
}
