//! Re-decompression check of freshly compressed output.

use std::sync::Arc;

use orobas_core::{ByteSink, ByteSource, CompressionMode, Error, JobFlags, Result, Status};

use crate::compress::CompressOptions;
use crate::inflate::{InflateOptions, InflateState};

const SCRATCH_SIZE: usize = 16 * 1024;

/// Whether a job re-decompresses its output: not opted out, not fixed mode.
pub fn is_verification_enabled(flags: JobFlags, mode: CompressionMode) -> bool {
    !flags.contains(JobFlags::OMIT_VERIFY) && mode != CompressionMode::Fixed
}

/// Streaming verifier fed with each call's produced bytes.
#[derive(Debug, Clone)]
pub struct Verifier {
    state: InflateState,
    scratch: Vec<u8>,
}

impl Verifier {
    /// Verifier for a stream written with `options`. Canned streams are
    /// decoded with the job table in decompression form.
    pub fn new(options: &CompressOptions, big_endian: bool) -> Result<Self> {
        let mut inflate = InflateOptions::new(options.framing).with_big_endian(big_endian);
        if options.mode == CompressionMode::Canned {
            let table = options
                .table
                .as_ref()
                .ok_or_else(|| Error::config("canned mode requires a huffman table"))?;
            inflate = inflate.with_canned(Arc::clone(table));
        }
        Ok(Self {
            state: InflateState::new(inflate)?,
            scratch: vec![0u8; SCRATCH_SIZE],
        })
    }

    /// Decode `produced`. On the last call the stream must be complete and
    /// its CRC32 must equal `expected_crc`.
    pub fn update(&mut self, produced: &[u8], last: bool, expected_crc: u32) -> Result<()> {
        let mut src = ByteSource::new(produced);
        loop {
            let mut dst = ByteSink::new(&mut self.scratch);
            let result = match self.state.step(&mut src, &mut dst, last) {
                Ok(result) => result,
                Err(e) => {
                    tracing::debug!(error = %e, "verification decode failed");
                    return Err(self.failure(expected_crc));
                }
            };
            match result.status {
                Status::MoreOutputNeeded => continue,
                Status::MoreInputNeeded => return Ok(()),
                Status::Done => break,
            }
        }

        if !last {
            // A stream may not end before its last call.
            return Err(self.failure(expected_crc));
        }
        if self.state.crc32() != expected_crc {
            return Err(self.failure(expected_crc));
        }
        Ok(())
    }

    fn failure(&self, expected: u32) -> Error {
        Error::VerificationFailed {
            expected,
            actual: self.state.crc32(),
        }
    }
}

/// Verify a complete stream in one call.
pub fn verify_stream(
    stream: &[u8],
    options: &CompressOptions,
    big_endian: bool,
    expected_crc: u32,
) -> Result<()> {
    Verifier::new(options, big_endian)?.update(stream, true, expected_crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::compress;
    use orobas_core::{crc32, Framing};

    #[test]
    fn test_enabled_rules() {
        assert!(is_verification_enabled(JobFlags::empty(), CompressionMode::Dynamic));
        assert!(!is_verification_enabled(JobFlags::OMIT_VERIFY, CompressionMode::Dynamic));
        assert!(!is_verification_enabled(JobFlags::empty(), CompressionMode::Fixed));
    }

    #[test]
    fn test_good_stream_passes() {
        let input = b"verify me, verify me, verify me".repeat(50);
        let options = CompressOptions::new(CompressionMode::Dynamic, Framing::Zlib);
        let stream = compress(&input, options.clone()).unwrap();
        verify_stream(&stream, &options, false, crc32(&input)).unwrap();
    }

    #[test]
    fn test_corrupted_stream_fails() {
        let input = b"verify me, verify me, verify me".repeat(50);
        let options = CompressOptions::new(CompressionMode::Stored, Framing::Raw);
        let mut stream = compress(&input, options.clone()).unwrap();
        let last = stream.len() - 1;
        stream[last] ^= 0x55;
        assert!(matches!(
            verify_stream(&stream, &options, false, crc32(&input)),
            Err(Error::VerificationFailed { .. })
        ));
    }

    #[test]
    fn test_streaming_updates() {
        let input = b"streamed verification".repeat(200);
        let options = CompressOptions::default();
        let stream = compress(&input, options.clone()).unwrap();
        let mut verifier = Verifier::new(&options, false).unwrap();
        let (head, tail) = stream.split_at(stream.len() / 2);
        verifier.update(head, false, 0).unwrap();
        verifier.update(tail, true, crc32(&input)).unwrap();
    }
}
