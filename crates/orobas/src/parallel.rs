//! Parallel container compression and decompression.
//!
//! Every chunk is an independent raw DEFLATE stream. On the accelerator up
//! to `slots` descriptors are kept in flight; completions are taken in
//! whatever order they arrive and placed by chunk index. On software the
//! chunks run one after another.
//!
//! Compressed chunks land in regions of the output buffer sized by their
//! worst-case compressed size, at prefix-sum offsets after the space
//! reserved for the header. Once every chunk is done the payloads are
//! compacted behind the header. Until then a failure leaves the regions of
//! finished chunks as they were written.

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orobas_accel::{AccelError, Completion, Descriptor, Dispatcher};
use orobas_core::{
    ByteSink, ByteSource, CompressionLevel, CompressionMode, Error as EngineError, ExecutionPath, Framing,
    JobFlags, Operation, OperationResult, Status,
};
use orobas_deflate::{is_verification_enabled, verify_stream, CompressOptions, InflateOptions};

use crate::aggregate::CrcAggregator;
use crate::chunk::ChunkPlan;
use crate::config::OrchestratorConfig;
use crate::container::ContainerHeader;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::stream::plan_chunks;

/// Pause between completion polls when nothing finished.
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Placement of compressed chunks in the output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    pub plan: ChunkPlan,
    /// Bytes reserved for the header.
    pub header_len: usize,
    regions: Vec<Range<usize>>,
}

impl ContainerLayout {
    /// Layout of `plan`, or an error when a chunk is too large to bound.
    pub fn new(plan: ChunkPlan) -> Result<Self> {
        let sizes = plan
            .safe_sizes()
            .ok_or_else(|| Error::config("chunk exceeds the single-shot size limit"))?;
        let header_len = ContainerHeader::encoded_len(plan.chunk_count);
        let mut offset = header_len;
        let regions = sizes
            .into_iter()
            .map(|size| {
                let region = offset..offset + size;
                offset = region.end;
                region
            })
            .collect();
        Ok(Self {
            plan,
            header_len,
            regions,
        })
    }

    /// Output bytes the compressor needs.
    pub fn capacity(&self) -> usize {
        self.regions.last().map_or(self.header_len, |r| r.end)
    }

    /// Region chunk `index` is compressed into.
    pub fn region(&self, index: usize) -> Range<usize> {
        self.regions[index].clone()
    }
}

/// Layout used by [`compress_container_into`] for `source_len` bytes.
pub fn container_layout(
    source_len: usize,
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<ContainerLayout> {
    ContainerLayout::new(plan_chunks(source_len, config, dispatcher))
}

/// Summary of a container compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerStats {
    /// Bytes of header and payload.
    pub written: usize,
    /// CRC32 of the whole input.
    pub crc32: u32,
    pub chunk_count: usize,
    /// Chunks that ran on the accelerator.
    pub hardware_chunks: usize,
}

/// Units of work the slot runner drives.
trait ChunkWork {
    fn count(&self) -> usize;

    /// Descriptor running chunk `index` on the accelerator.
    fn descriptor(&self, index: usize) -> Result<Descriptor>;

    /// Take the accelerator's result for chunk `index`.
    fn complete(&mut self, index: usize, result: OperationResult, completion: &Completion) -> Result<()>;

    /// Run chunk `index` on the host.
    fn run_software(&mut self, index: usize) -> Result<()>;
}

/// Whether the chunks of an `op` run on the accelerator.
fn use_hardware(op: Operation, config: &OrchestratorConfig, dispatcher: Option<&Dispatcher>) -> Result<bool> {
    let check = || -> std::result::Result<(), AccelError> {
        if !dispatcher.is_some_and(|d| d.supports(op, config.numa_node)) {
            return Err(AccelError::NoDevice(op.name()));
        }
        if op == Operation::Compress && config.level == CompressionLevel::High {
            return Err(AccelError::config("high compression level runs on software only"));
        }
        Ok(())
    };
    match config.path {
        ExecutionPath::Software => Ok(false),
        ExecutionPath::Hardware => check().map(|()| true).map_err(Error::from_accel),
        ExecutionPath::Auto => match check() {
            Ok(()) => Ok(true),
            Err(e) if e.is_fallback_eligible() => {
                tracing::debug!(op = op.name(), reason = %e, "container runs on software");
                Ok(false)
            }
            Err(e) => Err(Error::from_accel(e)),
        },
    }
}

fn timeout(started: Instant) -> Error {
    let elapsed = started.elapsed();
    tracing::warn!(?elapsed, "multi-chunk operation ran out of time");
    Error::Timeout { elapsed }
}

/// Drive every chunk of `work` to completion before the deadline.
fn run_chunks<W: ChunkWork>(
    work: &mut W,
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
    hardware: bool,
    started: Instant,
) -> Result<usize> {
    let deadline = started + config.timeout;
    let count = work.count();

    let dispatcher = match dispatcher {
        Some(dispatcher) if hardware => dispatcher,
        _ => {
            for index in 0..count {
                if Instant::now() >= deadline {
                    return Err(timeout(started));
                }
                work.run_software(index)?;
            }
            return Ok(0);
        }
    };

    let slots = config.slots.max(1);
    let fallback = config.path == ExecutionPath::Auto;
    let mut in_flight: Vec<(usize, Descriptor)> = Vec::with_capacity(slots);
    let mut next = 0;
    let mut on_hardware = 0;

    while next < count || !in_flight.is_empty() {
        while in_flight.len() < slots && next < count {
            let descriptor = work.descriptor(next)?.with_tag(next as u64);
            match dispatcher.submit_until(&descriptor, config.numa_node, deadline) {
                Ok(()) => in_flight.push((next, descriptor)),
                Err(e) if fallback && e.is_fallback_eligible() => {
                    tracing::warn!(chunk = next, reason = %e, "chunk falls back to software");
                    work.run_software(next)?;
                }
                Err(AccelError::Timeout(_)) => return Err(timeout(started)),
                Err(e) => return Err(Error::from_accel(e)),
            }
            next += 1;
        }

        let Some(position) = in_flight.iter().position(|(_, d)| d.completion().is_complete()) else {
            if Instant::now() >= deadline {
                return Err(timeout(started));
            }
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };

        let (index, descriptor) = in_flight.swap_remove(position);
        let completion = descriptor
            .completion()
            .poll()
            .ok_or(EngineError::InvalidState {
                expected: "written completion record",
                actual: "empty completion record",
            })?;
        match completion.record.to_result() {
            Ok(result) => {
                tracing::debug!(chunk = index, produced = result.produced, "chunk completed");
                work.complete(index, result, completion)?;
                on_hardware += 1;
            }
            Err(e) if fallback && e.is_fallback_eligible() => {
                tracing::warn!(chunk = index, reason = %e, "device rejected chunk, running on software");
                work.run_software(index)?;
            }
            Err(e) => return Err(Error::from_accel(e)),
        }
    }
    Ok(on_hardware)
}

struct CompressWork<'a> {
    input: &'a [u8],
    out: &'a mut [u8],
    layout: &'a ContainerLayout,
    options: CompressOptions,
    flags: JobFlags,
    config: &'a OrchestratorConfig,
    sizes: Vec<u32>,
    crcs: CrcAggregator,
}

impl CompressWork<'_> {
    fn chunk(&self, index: usize) -> &[u8] {
        &self.input[self.layout.plan.range(index)]
    }

    fn record(&mut self, index: usize, produced: usize, crc: u32) -> Result<()> {
        let size = u32::try_from(produced).map_err(|_| Error::config("compressed chunk exceeds 4 GiB"))?;
        if size == 0 {
            return Err(Error::Engine(EngineError::corrupted("empty compressed chunk")));
        }
        self.sizes[index] = size;
        let len = self.layout.plan.chunk_len(index) as u64;
        self.crcs.record(index, crc, len)
    }
}

impl ChunkWork for CompressWork<'_> {
    fn count(&self) -> usize {
        self.layout.plan.chunk_count
    }

    fn descriptor(&self, index: usize) -> Result<Descriptor> {
        Ok(Descriptor::compress(
            self.options.clone(),
            self.flags,
            Arc::from(self.chunk(index)),
            self.layout.region(index).len(),
        ))
    }

    fn complete(&mut self, index: usize, result: OperationResult, completion: &Completion) -> Result<()> {
        if result.status != Status::Done {
            return Err(EngineError::MoreOutputNeeded.into());
        }
        let output = completion
            .output
            .get(..result.produced)
            .ok_or_else(|| EngineError::corrupted("completion reports more output than it carries"))?;
        if is_verification_enabled(self.flags, self.options.mode) {
            verify_stream(output, &self.options, false, result.crc32)?;
        }
        let region = self.layout.region(index);
        self.out[region.start..region.start + output.len()].copy_from_slice(output);
        self.record(index, output.len(), result.crc32)
    }

    fn run_software(&mut self, index: usize) -> Result<()> {
        let mut job = Job::compress()
            .with_path(ExecutionPath::Software)
            .with_flags(self.flags)
            .with_level(self.config.level);
        if let Some(table) = &self.config.table {
            job = job.with_table(table.clone());
        }
        let region = self.layout.region(index);
        let input: &[u8] = self.input;
        let mut src = ByteSource::new(&input[self.layout.plan.range(index)]);
        let mut dst = ByteSink::new(&mut self.out[region]);
        let result = job.execute(None, &mut src, &mut dst)?;
        if result.status != Status::Done {
            return Err(EngineError::MoreOutputNeeded.into());
        }
        self.record(index, result.produced, result.crc32)
    }
}

/// Compress `input` as a container into `out`, which must hold at least
/// [`ContainerLayout::capacity`] bytes.
pub fn compress_container_into(
    input: &[u8],
    out: &mut [u8],
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<ContainerStats> {
    let started = Instant::now();
    let layout = container_layout(input.len(), config, dispatcher)?;
    if out.len() < layout.capacity() {
        return Err(EngineError::MoreOutputNeeded.into());
    }
    let hardware = use_hardware(Operation::Compress, config, dispatcher)?;
    let options = config.compress_options(Framing::Raw);
    options.validate()?;

    let count = layout.plan.chunk_count;
    let mut work = CompressWork {
        input,
        out,
        layout: &layout,
        options,
        flags: config.mode_flags() | JobFlags::FIRST | JobFlags::LAST,
        config,
        sizes: vec![0; count],
        crcs: CrcAggregator::new(count),
    };
    let hardware_chunks = run_chunks(&mut work, config, dispatcher, hardware, started)?;

    let crc32 = work.crcs.combined().ok_or(EngineError::InvalidState {
        expected: "every chunk recorded",
        actual: "missing chunk checksum",
    })?;
    let header = ContainerHeader {
        block_size: u32::try_from(layout.plan.chunk_size).map_err(|_| Error::config("chunk exceeds 4 GiB"))?,
        last_block_size: u32::try_from(layout.plan.last_chunk_size)
            .map_err(|_| Error::config("chunk exceeds 4 GiB"))?,
        compressed_sizes: work.sizes,
    };
    let out = work.out;

    let mut cursor = layout.header_len;
    for (index, &size) in header.compressed_sizes.iter().enumerate() {
        let region = layout.region(index);
        out.copy_within(region.start..region.start + size as usize, cursor);
        cursor += size as usize;
    }
    header.write_to(out)?;

    tracing::info!(
        input = input.len(),
        output = cursor,
        chunks = count,
        hardware_chunks,
        "container compressed"
    );
    Ok(ContainerStats {
        written: cursor,
        crc32,
        chunk_count: count,
        hardware_chunks,
    })
}

/// Compress `input` as a container into a new buffer.
pub fn compress_container(
    input: &[u8],
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<(Vec<u8>, ContainerStats)> {
    let layout = container_layout(input.len(), config, dispatcher)?;
    let mut out = vec![0u8; layout.capacity()];
    let stats = compress_container_into(input, &mut out, config, dispatcher)?;
    out.truncate(stats.written);
    Ok((out, stats))
}

struct DecompressWork<'a> {
    container: &'a [u8],
    header: ContainerHeader,
    payloads: Vec<Range<usize>>,
    out: &'a mut [u8],
    options: InflateOptions,
    flags: JobFlags,
    config: &'a OrchestratorConfig,
    crcs: CrcAggregator,
}

impl DecompressWork<'_> {
    fn block_range(&self, index: usize) -> Range<usize> {
        let start = index * self.header.block_size as usize;
        start..start + self.header.block_len(index)
    }

    fn record(&mut self, index: usize, result: &OperationResult) -> Result<()> {
        if result.status != Status::Done || result.produced != self.header.block_len(index) {
            return Err(Error::InvalidContainer("block does not decode to its recorded size"));
        }
        self.crcs.record(index, result.crc32, result.produced as u64)
    }
}

impl ChunkWork for DecompressWork<'_> {
    fn count(&self) -> usize {
        self.header.block_count()
    }

    fn descriptor(&self, index: usize) -> Result<Descriptor> {
        Ok(Descriptor::decompress(
            self.options.clone(),
            self.flags,
            Arc::from(&self.container[self.payloads[index].clone()]),
            self.header.block_len(index),
        ))
    }

    fn complete(&mut self, index: usize, result: OperationResult, completion: &Completion) -> Result<()> {
        self.record(index, &result)?;
        let range = self.block_range(index);
        let output = completion
            .output
            .get(..range.len())
            .ok_or_else(|| EngineError::corrupted("completion reports more output than it carries"))?;
        self.out[range].copy_from_slice(output);
        Ok(())
    }

    fn run_software(&mut self, index: usize) -> Result<()> {
        let mut job = Job::decompress()
            .with_path(ExecutionPath::Software)
            .with_flags(self.flags);
        if let Some(table) = &self.config.table {
            job = job.with_table(table.clone());
        }
        let range = self.block_range(index);
        let container: &[u8] = self.container;
        let mut src = ByteSource::new(&container[self.payloads[index].clone()]);
        let mut dst = ByteSink::new(&mut self.out[range]);
        let result = job.execute(None, &mut src, &mut dst)?;
        self.record(index, &result)
    }
}

/// Decompress a container, returning the data and its CRC32.
pub fn decompress_container(
    container: &[u8],
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<(Vec<u8>, u32)> {
    let started = Instant::now();
    let (header, header_len) = ContainerHeader::parse(container)?;
    let original_len =
        usize::try_from(header.original_len()).map_err(|_| Error::InvalidContainer("original size overflows"))?;
    let hardware = use_hardware(Operation::Decompress, config, dispatcher)?;

    let mut options = InflateOptions::new(Framing::Raw);
    let mut flags = JobFlags::FIRST | JobFlags::LAST;
    if config.mode == CompressionMode::Canned {
        let table = config
            .table
            .clone()
            .ok_or_else(|| Error::config("canned mode requires a huffman table"))?;
        options = options.with_canned(table);
        flags |= JobFlags::CANNED_MODE;
    }

    let mut out = vec![0u8; original_len];
    let count = header.block_count();
    let mut work = DecompressWork {
        container,
        payloads: header.payload_ranges(header_len),
        header,
        out: &mut out,
        options,
        flags,
        config,
        crcs: CrcAggregator::new(count),
    };
    let hardware_chunks = run_chunks(&mut work, config, dispatcher, hardware, started)?;
    let crc32 = work.crcs.combined().ok_or(EngineError::InvalidState {
        expected: "every block recorded",
        actual: "missing block checksum",
    })?;
    tracing::info!(output = original_len, blocks = count, hardware_chunks, "container decompressed");
    Ok((out, crc32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orobas_core::crc32;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i / 1000) as u8).collect()
    }

    #[test]
    fn test_layout_regions() {
        let plan = ChunkPlan::by_count(100_000, 3, None);
        let layout = ContainerLayout::new(plan).unwrap();
        assert_eq!(layout.header_len, 24);
        assert_eq!(layout.region(0).start, 24);
        assert_eq!(layout.region(1).start, layout.region(0).end);
        assert_eq!(layout.capacity(), 24 + plan.estimate());
    }

    #[test]
    fn test_software_container_roundtrip() {
        let input = sample(200_000);
        let config = OrchestratorConfig::new()
            .with_path(ExecutionPath::Software)
            .with_chunk_count(6);
        let (container, stats) = compress_container(&input, &config, None).unwrap();
        assert_eq!(stats.chunk_count, 6);
        assert_eq!(stats.hardware_chunks, 0);
        assert_eq!(stats.crc32, crc32(&input));
        assert_eq!(stats.written, container.len());

        let (decoded, crc) = decompress_container(&container, &config, None).unwrap();
        assert_eq!(decoded, input);
        assert_eq!(crc, crc32(&input));
    }

    #[test]
    fn test_small_output_buffer() {
        let input = sample(5_000);
        let config = OrchestratorConfig::new().with_path(ExecutionPath::Software);
        let mut out = vec![0u8; 100];
        assert!(matches!(
            compress_container_into(&input, &mut out, &config, None),
            Err(Error::Engine(EngineError::MoreOutputNeeded))
        ));
    }

    #[test]
    fn test_hardware_path_without_device() {
        let config = OrchestratorConfig::new().with_path(ExecutionPath::Hardware);
        assert!(matches!(
            compress_container(b"data", &config, None),
            Err(Error::Accel(AccelError::NoDevice(_)))
        ));
    }

    #[test]
    fn test_corrupt_container_rejected() {
        let input = sample(50_000);
        let config = OrchestratorConfig::new().with_path(ExecutionPath::Software);
        let (mut container, _) = compress_container(&input, &config, None).unwrap();
        container[0] ^= 1;
        assert!(decompress_container(&container, &config, None).is_err());
    }

    #[test]
    fn test_oversized_header_rejected_before_allocating() {
        let header = ContainerHeader {
            block_size: u32::MAX,
            last_block_size: u32::MAX,
            compressed_sizes: vec![1; 16],
        };
        let mut container = header.to_bytes();
        container.extend_from_slice(&[0x03; 16]);
        let config = OrchestratorConfig::new().with_path(ExecutionPath::Software);
        assert!(matches!(
            decompress_container(&container, &config, None),
            Err(Error::InvalidContainer(_))
        ));
    }
}
