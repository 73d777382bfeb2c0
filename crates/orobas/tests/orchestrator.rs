//! End-to-end behaviour of jobs, streams and containers on both backends.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use orobas::{
    compress_container, compress_container_into, compress_stream, container_layout, decompress_container,
    decompress_stream, estimate_compressed_size, ByteSink, ByteSource, CompressionMode, Dispatcher, Error,
    ExecutionPath, Framing, Job, JobFlags, OrchestratorConfig, Status,
};
use orobas_accel::{AccelError, EmulatedDeviceConfig, EmulatedEnumerator, EmulationHooks, Fault, RegistryConfig};
use orobas_core::crc32;
use orobas_deflate::{compress, CompressOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn emulated(hooks: EmulationHooks) -> Dispatcher {
    let enumerator = EmulatedEnumerator::new(RegistryConfig::default()).with_hooks(hooks);
    Dispatcher::discover(&enumerator).unwrap()
}

fn corpus(len: usize) -> Vec<u8> {
    let words: [&[u8]; 6] = [b"accelerator ", b"deflate ", b"slot ", b"chunk ", b"window ", b"huffman "];
    let mut rng = StdRng::seed_from_u64(7);
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        if rng.gen_ratio(1, 5) {
            out.push(rng.gen());
        } else {
            out.extend_from_slice(words[rng.gen_range(0..words.len())]);
        }
    }
    out.truncate(len);
    out
}

fn flate2_decode(stream: &[u8], framing: Framing) -> Vec<u8> {
    let mut out = Vec::new();
    match framing {
        Framing::Raw => flate2::read::DeflateDecoder::new(stream).read_to_end(&mut out),
        Framing::Gzip => flate2::read::GzDecoder::new(stream).read_to_end(&mut out),
        Framing::Zlib => flate2::read::ZlibDecoder::new(stream).read_to_end(&mut out),
    }
    .expect("flate2 rejected the stream");
    out
}

#[test]
fn test_stream_roundtrip_all_backends_and_modes() {
    let dispatcher = emulated(EmulationHooks::default());
    let input = corpus(180_000);

    for mode in [CompressionMode::Fixed, CompressionMode::Dynamic, CompressionMode::Stored] {
        for framing in [Framing::Raw, Framing::Gzip, Framing::Zlib] {
            let base = OrchestratorConfig::new().with_mode(mode).with_framing(framing).with_chunk_count(4);
            let software = base.clone().with_path(ExecutionPath::Software);
            let hardware = base.with_path(ExecutionPath::Hardware);

            let sw = compress_stream(&input, &software, Some(&dispatcher)).unwrap();
            let hw = compress_stream(&input, &hardware, Some(&dispatcher)).unwrap();
            assert_eq!(sw.backend, Some(ExecutionPath::Software));
            assert_eq!(hw.backend, Some(ExecutionPath::Hardware));
            assert_eq!(sw.data, hw.data, "{mode:?} {framing:?}");
            assert_eq!(hw.crc32, crc32(&input));

            assert_eq!(flate2_decode(&hw.data, framing), input, "{mode:?} {framing:?}");
            assert_eq!(decompress_stream(&hw.data, &software, None).unwrap(), input);
            assert_eq!(decompress_stream(&sw.data, &hardware, Some(&dispatcher)).unwrap(), input);
        }
    }
}

#[test]
fn test_container_roundtrip_and_identity() {
    let dispatcher = emulated(EmulationHooks::default());
    let input = corpus(500_000);
    let config = OrchestratorConfig::new().with_chunk_count(8);

    let (hw, hw_stats) = compress_container(&input, &config, Some(&dispatcher)).unwrap();
    let software = config.clone().with_path(ExecutionPath::Software);
    let (sw, sw_stats) = compress_container(&input, &software, None).unwrap();

    assert_eq!(hw_stats.hardware_chunks, 8);
    assert_eq!(sw_stats.hardware_chunks, 0);
    assert_eq!(hw, sw);
    assert_eq!(hw_stats.crc32, crc32(&input));
    assert_eq!(hw_stats.crc32, sw_stats.crc32);

    let (decoded, crc) = decompress_container(&hw, &config, Some(&dispatcher)).unwrap();
    assert_eq!(decoded, input);
    assert_eq!(crc, crc32(&input));
}

#[test]
fn test_out_of_order_completion_keeps_logical_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let order = Arc::clone(&finished);
    let hooks = EmulationHooks::default()
        .with_latency(|d| if d.tag == 2 { Duration::from_millis(500) } else { Duration::ZERO })
        .with_fault(move |d| {
            order.lock().unwrap().push(d.tag);
            None
        });
    let dispatcher = emulated(hooks);

    let input = corpus(80_000);
    let config = OrchestratorConfig::new()
        .with_path(ExecutionPath::Hardware)
        .with_chunk_count(8)
        .with_slots(4);
    let (container, stats) = compress_container(&input, &config, Some(&dispatcher)).unwrap();
    assert_eq!(stats.chunk_count, 8);

    let finished = finished.lock().unwrap().clone();
    let position = |tag: u64| finished.iter().position(|&t| t == tag).unwrap();
    assert!(position(5) < position(2), "completion order {finished:?}");

    let software = config.clone().with_path(ExecutionPath::Software);
    let (expected, _) = compress_container(&input, &software, None).unwrap();
    assert_eq!(container, expected);
    assert_eq!(decompress_container(&container, &software, None).unwrap().0, input);
}

#[test]
fn test_busy_queue_times_out_without_touching_finished_chunks() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let hooks = EmulationHooks::default().with_busy(move |_| counter.fetch_add(1, Ordering::SeqCst) >= 3);
    let dispatcher = emulated(hooks);

    let input = corpus(200_000);
    let config = OrchestratorConfig::new()
        .with_chunk_count(8)
        .with_timeout(Duration::from_millis(300));
    let layout = container_layout(input.len(), &config, Some(&dispatcher)).unwrap();
    let mut out = vec![0xEEu8; layout.capacity()];

    let started = Instant::now();
    let result = compress_container_into(&input, &mut out, &config, Some(&dispatcher));
    assert!(matches!(result, Err(Error::Timeout { .. })), "{result:?}");
    assert!(started.elapsed() >= Duration::from_millis(300));

    // The header is only written once every chunk is done.
    assert!(out[..layout.header_len].iter().all(|&b| b == 0xEE));
    let options = config.compress_options(Framing::Raw);
    for index in 0..layout.plan.chunk_count {
        let region = &out[layout.region(index)];
        if region.iter().all(|&b| b == 0xEE) {
            continue;
        }
        let expected = compress(&input[layout.plan.range(index)], options.clone()).unwrap();
        assert_eq!(&region[..expected.len()], &expected[..], "chunk {index}");
    }
}

#[test]
fn test_streaming_buffer_matches_estimate() {
    let input = vec![0x5Au8; 21 << 20];
    let config = OrchestratorConfig::new()
        .with_path(ExecutionPath::Software)
        .with_mode(CompressionMode::Stored)
        .with_verify(false)
        .with_chunk_count(7);
    let out = compress_stream(&input, &config, None).unwrap();
    assert_eq!(out.chunk_count, 7);
    assert_eq!(out.capacity, estimate_compressed_size(input.len(), 7));
    assert_eq!(out.crc32, crc32(&input));

    let layout = container_layout(input.len(), &config, None).unwrap();
    assert_eq!(layout.capacity(), layout.header_len + out.capacity);
}

#[test]
fn test_corrupt_device_output_fails_verification() {
    let hooks = EmulationHooks::default().with_fault(|d| (d.tag == 1).then_some(Fault::CorruptOutput));
    let dispatcher = emulated(hooks);
    let input = corpus(100_000);
    let config = OrchestratorConfig::new().with_path(ExecutionPath::Hardware).with_chunk_count(4);

    let error = compress_container(&input, &config, Some(&dispatcher)).unwrap_err();
    assert!(error.is_integrity_failure(), "{error:?}");

    // Without verification the corruption goes unnoticed by the compressor.
    let unchecked = config.with_verify(false);
    assert!(compress_container(&input, &unchecked, Some(&dispatcher)).is_ok());
}

#[test]
fn test_page_fault_is_reported() {
    let hooks = EmulationHooks::default().with_fault(|_| Some(Fault::PageFault { address: 0xDEAD_B000 }));
    let dispatcher = emulated(hooks);
    let input = corpus(10_000);

    let mut job = Job::compress().with_path(ExecutionPath::Auto);
    let mut out = vec![0u8; 20_000];
    let mut src = ByteSource::new(&input);
    let mut dst = ByteSink::new(&mut out);
    let error = job.execute(Some(&dispatcher), &mut src, &mut dst).unwrap_err();
    assert!(matches!(
        error,
        Error::Accel(AccelError::PageFault {
            address: 0xDEAD_B000,
            ..
        })
    ));
    assert_eq!(src.position(), 0);
    assert_eq!(dst.position(), 0);
}

#[test]
fn test_job_backends_are_byte_identical() {
    let dispatcher = emulated(EmulationHooks::default());
    let input = corpus(150_000);
    let flags = JobFlags::FIRST | JobFlags::LAST | JobFlags::DYNAMIC_HUFFMAN | JobFlags::GZIP_MODE;

    let mut streams = Vec::new();
    for path in [ExecutionPath::Software, ExecutionPath::Hardware] {
        let mut job = Job::compress().with_path(path).with_flags(flags);
        let mut out = vec![0u8; input.len() + 1024];
        let mut src = ByteSource::new(&input);
        let mut dst = ByteSink::new(&mut out);
        let result = job.execute(Some(&dispatcher), &mut src, &mut dst).unwrap();
        assert_eq!(result.status, Status::Done);
        assert_eq!(job.backend(), Some(path));
        let written = dst.position();
        out.truncate(written);
        streams.push(out);
    }
    assert_eq!(streams[0], streams[1]);
    assert_eq!(flate2_decode(&streams[0], Framing::Gzip), input);
}

#[test]
fn test_stored_overflow_rolls_back() {
    let input = corpus(1_000);
    let stored = compress(&input, CompressOptions::new(CompressionMode::Stored, Framing::Raw)).unwrap();
    let mut out = vec![0u8; stored.len() - 1];

    let mut job = Job::compress()
        .with_path(ExecutionPath::Software)
        .with_flags(JobFlags::FIRST | JobFlags::LAST | JobFlags::STORED);
    let mut src = ByteSource::new(&input);
    let mut dst = ByteSink::new(&mut out);
    let result = job.execute(None, &mut src, &mut dst).unwrap();
    assert_eq!(result.status, Status::MoreOutputNeeded);
    assert_eq!(src.position(), 0);
    assert_eq!(dst.position(), 0);
}

#[test]
fn test_bad_gzip_trailer_is_checksum_mismatch_on_both_backends() {
    let dispatcher = emulated(EmulationHooks::default());
    let input = corpus(30_000);
    let mut stream = compress(&input, CompressOptions::new(CompressionMode::Dynamic, Framing::Gzip)).unwrap();
    let crc_at = stream.len() - 8;
    stream[crc_at] ^= 0x5A;

    for path in [ExecutionPath::Software, ExecutionPath::Hardware] {
        let mut job = Job::decompress()
            .with_path(path)
            .with_flags(JobFlags::FIRST | JobFlags::LAST | JobFlags::GZIP_MODE);
        let mut out = vec![0u8; input.len() + 64];
        let mut src = ByteSource::new(&stream);
        let mut dst = ByteSink::new(&mut out);
        let error = job.execute(Some(&dispatcher), &mut src, &mut dst).unwrap_err();
        assert!(error.is_integrity_failure(), "{path:?}: {error:?}");
        assert!(
            matches!(error, Error::Engine(orobas_core::Error::ChecksumMismatch { .. })),
            "{path:?}: {error:?}"
        );
        assert_eq!(src.position(), 0);
    }
}

#[test]
fn test_hardware_stream_refuses_mid_stream_fallback() {
    let enumerator = EmulatedEnumerator::new(
        RegistryConfig::none().with_device(EmulatedDeviceConfig::default().with_max_transfer_size(1000)),
    );
    let dispatcher = Dispatcher::discover(&enumerator).unwrap();
    let input = corpus(100_500);
    let mut out = vec![0u8; 200_000];

    let mut job = Job::compress().with_path(ExecutionPath::Auto).with_flags(JobFlags::FIRST);
    let mut src = ByteSource::new(&input[..500]);
    let mut dst = ByteSink::new(&mut out);
    let first = job.execute(Some(&dispatcher), &mut src, &mut dst).unwrap();
    assert_eq!(first.status, Status::MoreInputNeeded);
    assert_eq!(job.backend(), Some(ExecutionPath::Hardware));
    let written = dst.position();

    let mut src = ByteSource::new(&input[500..]);
    let mut dst = ByteSink::new(&mut out[written..]);
    let error = job.execute(Some(&dispatcher), &mut src, &mut dst).unwrap_err();
    assert!(matches!(error, Error::MidStreamFallback), "{error:?}");
    assert_eq!(error.category(), "mid_stream_fallback");
    assert_eq!(src.position(), 0);
    assert_eq!(dst.position(), 0);
}

#[test]
fn test_auto_container_without_device_runs_on_software() {
    let input = corpus(50_000);
    let config = OrchestratorConfig::new();
    let (container, stats) = compress_container(&input, &config, Some(&Dispatcher::unavailable())).unwrap();
    assert_eq!(stats.hardware_chunks, 0);
    assert_eq!(decompress_container(&container, &config, None).unwrap().0, input);
}
