//! Streaming multi-chunk operations: one job driven call by call over the
//! chunks of a large input, producing one standard stream.

use std::time::Instant;

use orobas_accel::Dispatcher;
use orobas_core::{ByteSink, ByteSource, CompressionMode, Error as EngineError, ExecutionPath, JobFlags, Status};

use crate::chunk::ChunkPlan;
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::job::Job;

/// Output scratch of the streaming decompressor.
pub const DEFAULT_OUTPUT_CHUNK: usize = 64 * 1024;

/// Result of [`compress_stream`].
#[derive(Debug, Clone)]
pub struct StreamOutput {
    /// The compressed stream.
    pub data: Vec<u8>,
    /// Size of the buffer the stream was written into.
    pub capacity: usize,
    /// CRC32 of the whole input.
    pub crc32: u32,
    pub total_in: u64,
    pub chunk_count: usize,
    /// Backend that ran the stream.
    pub backend: Option<ExecutionPath>,
}

/// Chunk plan of `source_len` bytes under `config`.
///
/// Chunks are clamped to the smallest transfer size of the devices the
/// accelerator could use; a software-only configuration is not clamped.
pub fn plan_chunks(source_len: usize, config: &OrchestratorConfig, dispatcher: Option<&Dispatcher>) -> ChunkPlan {
    let max_transfer = match config.path {
        ExecutionPath::Software => None,
        _ => dispatcher.and_then(|d| d.max_transfer_size(config.numa_node)),
    };
    match config.chunk_size {
        Some(size) => ChunkPlan::by_size(source_len, size, max_transfer),
        None => ChunkPlan::by_count(source_len, config.chunk_count, max_transfer),
    }
}

fn job_for(job: Job, config: &OrchestratorConfig) -> Job {
    let job = job
        .with_path(config.path)
        .with_level(config.level)
        .with_numa_node(config.numa_node);
    match &config.table {
        Some(table) => job.with_table(table.clone()),
        None => job,
    }
}

/// Remaining share of the overall budget, or a timeout error.
fn remaining(started: Instant, config: &OrchestratorConfig) -> Result<std::time::Duration> {
    let elapsed = started.elapsed();
    match config.timeout.checked_sub(elapsed) {
        Some(left) if !left.is_zero() => Ok(left),
        _ => {
            tracing::warn!(?elapsed, "streaming operation ran out of time");
            Err(Error::Timeout { elapsed })
        }
    }
}

/// Compress `input` into one DEFLATE, gzip or zlib stream with one call per
/// chunk.
///
/// The output buffer holds the summed worst-case size of every chunk, so
/// no call runs out of room.
pub fn compress_stream(
    input: &[u8],
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<StreamOutput> {
    let plan = plan_chunks(input.len(), config, dispatcher);
    let capacity = plan.estimate();
    if capacity == 0 {
        return Err(Error::config(format!(
            "chunk of {} bytes exceeds the single-shot size limit",
            plan.chunk_size.max(plan.last_chunk_size)
        )));
    }

    let started = Instant::now();
    let mut data = vec![0u8; capacity];
    let mut job = job_for(Job::compress(), config);
    let base_flags = config.mode_flags() | config.framing.flags();
    let mut dst = ByteSink::new(&mut data);
    let mut crc32 = 0;

    for (index, range) in plan.ranges().enumerate() {
        let mut flags = base_flags;
        if index == 0 {
            flags |= JobFlags::FIRST;
        }
        if index + 1 == plan.chunk_count {
            flags |= JobFlags::LAST;
        }
        job.flags = flags;
        job.timeout = remaining(started, config)?;

        let mut src = ByteSource::new(&input[range.clone()]);
        let result = job.execute(dispatcher, &mut src, &mut dst)?;
        match result.status {
            Status::MoreOutputNeeded => return Err(EngineError::MoreOutputNeeded.into()),
            _ if !src.is_empty() => {
                return Err(Error::Engine(EngineError::InvalidState {
                    expected: "chunk fully consumed",
                    actual: "input left over",
                }))
            }
            _ => {}
        }
        crc32 = result.crc32;
        tracing::debug!(chunk = index, len = range.len(), produced = result.produced, "compressed chunk");
    }

    let written = dst.position();
    data.truncate(written);
    tracing::info!(
        input = input.len(),
        output = written,
        chunks = plan.chunk_count,
        backend = ?job.backend(),
        "stream compressed"
    );
    Ok(StreamOutput {
        data,
        capacity,
        crc32,
        total_in: job.total_in(),
        chunk_count: plan.chunk_count,
        backend: job.backend(),
    })
}

/// Decompress one stream, feeding it in chunks of the configured plan.
pub fn decompress_stream(
    input: &[u8],
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<Vec<u8>> {
    let plan = plan_chunks(input.len(), config, dispatcher);
    decompress_stream_chunked(input, plan.chunk_size.max(1), DEFAULT_OUTPUT_CHUNK, config, dispatcher)
}

/// Decompress one stream offered `input_chunk` bytes at a time into an
/// output window of `output_chunk` bytes. Data after the end of the stream
/// is ignored.
pub fn decompress_stream_chunked(
    input: &[u8],
    input_chunk: usize,
    output_chunk: usize,
    config: &OrchestratorConfig,
    dispatcher: Option<&Dispatcher>,
) -> Result<Vec<u8>> {
    if input_chunk == 0 || output_chunk == 0 {
        return Err(Error::config("chunk sizes must be non-zero"));
    }
    let started = Instant::now();
    let mut job = job_for(Job::decompress(), config);
    let mut flags = config.framing.flags();
    if config.mode == CompressionMode::Canned {
        flags |= JobFlags::CANNED_MODE;
    }

    let mut output = Vec::new();
    let mut window = vec![0u8; output_chunk];
    let chunks: Vec<&[u8]> = if input.is_empty() {
        vec![input]
    } else {
        input.chunks(input_chunk).collect()
    };

    for (index, chunk) in chunks.iter().enumerate() {
        let mut call_flags = flags;
        if index == 0 {
            call_flags |= JobFlags::FIRST;
        }
        if index + 1 == chunks.len() {
            call_flags |= JobFlags::LAST;
        }
        job.flags = call_flags;

        let mut src = ByteSource::new(chunk);
        loop {
            job.timeout = remaining(started, config)?;
            let mut dst = ByteSink::new(&mut window);
            let result = job.execute(dispatcher, &mut src, &mut dst)?;
            output.extend_from_slice(&window[..result.produced]);
            match result.status {
                Status::Done => {
                    tracing::debug!(input = job.total_in(), output = output.len(), "stream decompressed");
                    return Ok(output);
                }
                Status::MoreOutputNeeded => continue,
                Status::MoreInputNeeded => break,
            }
        }
    }
    Err(EngineError::unexpected_eof(input.len()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orobas_accel::{EmulatedDeviceConfig, EmulatedEnumerator, RegistryConfig};
    use orobas_core::{crc32, Framing};

    fn sample(len: usize) -> Vec<u8> {
        let text = b"streaming chunks keep one deflate stream going across calls. ";
        text.iter().cycle().take(len).copied().collect()
    }

    #[test]
    fn test_software_stream_roundtrip() {
        let input = sample(300_000);
        let config = OrchestratorConfig::new()
            .with_path(ExecutionPath::Software)
            .with_framing(Framing::Gzip)
            .with_chunk_count(5);
        let out = compress_stream(&input, &config, None).unwrap();
        assert_eq!(out.chunk_count, 5);
        assert_eq!(out.crc32, crc32(&input));
        assert_eq!(out.total_in, input.len() as u64);
        assert!(out.data.len() <= out.capacity);
        assert_eq!(decompress_stream(&out.data, &config, None).unwrap(), input);
    }

    #[test]
    fn test_tiny_decompress_windows() {
        let input = sample(20_000);
        let config = OrchestratorConfig::new().with_path(ExecutionPath::Software).with_framing(Framing::Zlib);
        let out = compress_stream(&input, &config, None).unwrap();
        let decoded = decompress_stream_chunked(&out.data, 1, 7, &config, None).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_truncated_stream() {
        let input = sample(10_000);
        let config = OrchestratorConfig::new().with_path(ExecutionPath::Software);
        let out = compress_stream(&input, &config, None).unwrap();
        let cut = &out.data[..out.data.len() / 2];
        assert!(decompress_stream(cut, &config, None).is_err());
    }

    #[test]
    fn test_plan_clamped_by_device() {
        let device = EmulatedDeviceConfig::default().with_max_transfer_size(4_096);
        let enumerator = EmulatedEnumerator::new(RegistryConfig::none().with_device(device));
        let dispatcher = Dispatcher::discover(&enumerator).unwrap();

        let config = OrchestratorConfig::new().with_chunk_count(2);
        let plan = plan_chunks(10_000, &config, Some(&dispatcher));
        assert_eq!(plan.chunk_size, 4_096);
        assert_eq!(plan.chunk_count, 3);

        let software = config.clone().with_path(ExecutionPath::Software);
        assert_eq!(plan_chunks(10_000, &software, Some(&dispatcher)).chunk_count, 2);

        let input = sample(10_000);
        let out = compress_stream(&input, &config, Some(&dispatcher)).unwrap();
        assert_eq!(out.backend, Some(ExecutionPath::Hardware));
        assert_eq!(decompress_stream(&out.data, &config, Some(&dispatcher)).unwrap(), input);
    }
}
