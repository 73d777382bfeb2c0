//! Completion records.
//!
//! A device writes exactly one 64-byte record per accepted descriptor. The
//! host observes it through a [`CompletionHandle`] without ever mutating it.

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use orobas_core::{Aggregates, Error, OperationResult, Status};

use crate::error::{AccelError, Result};

/// Completion status byte values.
pub mod status {
    /// Stream finished; all input processed.
    pub const SUCCESS: u8 = 0x01;
    /// All input processed; the stream continues in a later descriptor.
    pub const SUCCESS_MORE_INPUT: u8 = 0x02;
    /// Buffer address could not be translated.
    pub const PAGE_FAULT: u8 = 0x03;
    /// Output buffer exhausted before the input was processed.
    pub const OUTPUT_OVERFLOW: u8 = 0x05;
    /// Input stream rejected; see the error code.
    pub const DATA_ERROR: u8 = 0x0A;
    /// Descriptor fields describe an unsupported job.
    pub const INVALID_CONFIG: u8 = 0x10;
    /// Internal device failure.
    pub const DEVICE_ERROR: u8 = 0x1F;
    /// Host-synthesized completion for work that needed no device.
    pub const TRIVIAL_COMPLETE: u8 = 0xFF;
}

/// Error code byte values accompanying [`status::DATA_ERROR`].
pub mod error_code {
    pub const NONE: u8 = 0x00;
    pub const CORRUPTED: u8 = 0x01;
    pub const CHECKSUM: u8 = 0x02;
    pub const TRUNCATED: u8 = 0x03;
}

/// Device-written completion record.
///
/// CRC64 results overlay `crc` (low half) and `min_first_agg` (high half).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionRecord {
    pub status: u8,
    pub error_code: u8,
    pub fault_info: u8,
    reserved0: u8,
    pub bytes_completed: u32,
    pub fault_address: u64,
    pub invalid_flags: u64,
    pub output_size: u32,
    pub output_bits: u8,
    reserved1: u8,
    pub xor_checksum: u16,
    pub crc: u32,
    pub min_first_agg: u32,
    pub max_last_agg: u32,
    pub sum_agg: u32,
    reserved2: u64,
    reserved3: u64,
}

/// Size of a completion record in bytes.
pub const RECORD_SIZE: usize = 64;

const _: () = assert!(std::mem::size_of::<CompletionRecord>() == RECORD_SIZE);

impl CompletionRecord {
    /// Record with the given status and everything else zeroed.
    pub fn with_status(status: u8) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Host-side success record for `bytes_processed` input bytes that were
    /// only accumulated.
    pub fn trivial(bytes_processed: u32) -> Self {
        Self {
            status: status::TRIVIAL_COMPLETE,
            error_code: error_code::NONE,
            bytes_completed: bytes_processed,
            output_size: 0,
            ..Self::default()
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.status == status::TRIVIAL_COMPLETE
    }

    /// Whether the status reports success (possibly partial).
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            status::SUCCESS
                | status::SUCCESS_MORE_INPUT
                | status::OUTPUT_OVERFLOW
                | status::TRIVIAL_COMPLETE
        )
    }

    pub fn crc64(&self) -> u64 {
        (u64::from(self.min_first_agg) << 32) | u64::from(self.crc)
    }

    pub fn set_crc64(&mut self, value: u64) {
        self.crc = value as u32;
        self.min_first_agg = (value >> 32) as u32;
    }

    pub fn aggregates(&self) -> Aggregates {
        Aggregates {
            min_first: self.min_first_agg,
            max_last: self.max_last_agg,
            sum: self.sum_agg,
        }
    }

    pub fn set_aggregates(&mut self, aggregates: Aggregates) {
        self.min_first_agg = aggregates.min_first;
        self.max_last_agg = aggregates.max_last;
        self.sum_agg = aggregates.sum;
    }

    /// Interpret the record as the common result contract, or as the error
    /// it reports.
    pub fn to_result(&self) -> Result<OperationResult> {
        let status = match self.status {
            status::SUCCESS => Status::Done,
            status::SUCCESS_MORE_INPUT | status::TRIVIAL_COMPLETE => Status::MoreInputNeeded,
            status::OUTPUT_OVERFLOW => Status::MoreOutputNeeded,
            status::PAGE_FAULT => {
                return Err(AccelError::PageFault {
                    fault_info: self.fault_info,
                    address: self.fault_address,
                })
            }
            status::DATA_ERROR => return Err(self.data_error().into()),
            status::INVALID_CONFIG => {
                return Err(AccelError::config(format!(
                    "descriptor rejected by device (invalid flags 0x{:x})",
                    self.invalid_flags
                )))
            }
            other => {
                return Err(AccelError::Device {
                    status: other,
                    error_code: self.error_code,
                })
            }
        };
        Ok(OperationResult {
            status,
            consumed: self.bytes_completed as usize,
            produced: self.output_size as usize,
            last_bit_offset: self.output_bits,
            crc32: self.crc,
            xor_checksum: self.xor_checksum,
            crc64: self.crc64(),
            aggregates: self.aggregates(),
        })
    }

    fn data_error(&self) -> Error {
        match self.error_code {
            error_code::CHECKSUM => Error::checksum_mismatch(self.max_last_agg, self.crc),
            error_code::TRUNCATED => Error::unexpected_eof(self.bytes_completed as usize),
            _ => Error::corrupted_at("device rejected input", self.bytes_completed as usize),
        }
    }

    /// Little-endian wire image.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0] = self.status;
        out[1] = self.error_code;
        out[2] = self.fault_info;
        out[4..8].copy_from_slice(&self.bytes_completed.to_le_bytes());
        out[8..16].copy_from_slice(&self.fault_address.to_le_bytes());
        out[16..24].copy_from_slice(&self.invalid_flags.to_le_bytes());
        out[24..28].copy_from_slice(&self.output_size.to_le_bytes());
        out[28] = self.output_bits;
        out[30..32].copy_from_slice(&self.xor_checksum.to_le_bytes());
        out[32..36].copy_from_slice(&self.crc.to_le_bytes());
        out[36..40].copy_from_slice(&self.min_first_agg.to_le_bytes());
        out[40..44].copy_from_slice(&self.max_last_agg.to_le_bytes());
        out[44..48].copy_from_slice(&self.sum_agg.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| (u64::from(u32_at(at + 4)) << 32) | u64::from(u32_at(at));
        Self {
            status: bytes[0],
            error_code: bytes[1],
            fault_info: bytes[2],
            bytes_completed: u32_at(4),
            fault_address: u64_at(8),
            invalid_flags: u64_at(16),
            output_size: u32_at(24),
            output_bits: bytes[28],
            xor_checksum: u16::from_le_bytes([bytes[30], bytes[31]]),
            crc: u32_at(32),
            min_first_agg: u32_at(36),
            max_last_agg: u32_at(40),
            sum_agg: u32_at(44),
            ..Self::default()
        }
    }
}

/// A written record together with the output bytes it describes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub record: CompletionRecord,
    pub output: Vec<u8>,
}

const SPIN_ROUNDS: u32 = 64;
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Shared slot a device writes its completion into, once.
#[derive(Debug, Clone, Default)]
pub struct CompletionHandle(Arc<OnceLock<Completion>>);

impl CompletionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the completion. Returns false if one was already written.
    pub fn complete(&self, completion: Completion) -> bool {
        self.0.set(completion).is_ok()
    }

    /// Non-blocking check.
    pub fn poll(&self) -> Option<&Completion> {
        self.0.get()
    }

    pub fn is_complete(&self) -> bool {
        self.0.get().is_some()
    }

    /// Block until the record is written or `timeout` has passed.
    pub fn wait(&self, timeout: Duration) -> Result<&Completion> {
        self.wait_until(Instant::now() + timeout, timeout)
    }

    /// Block until the record is written or `deadline` is reached.
    pub fn wait_until(&self, deadline: Instant, budget: Duration) -> Result<&Completion> {
        let mut rounds = 0u32;
        loop {
            if let Some(completion) = self.0.get() {
                return Ok(completion);
            }
            if Instant::now() >= deadline {
                return Err(AccelError::Timeout(budget));
            }
            if rounds < SPIN_ROUNDS {
                rounds += 1;
                std::hint::spin_loop();
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<CompletionRecord>(), 64);
        let mut record = CompletionRecord::with_status(status::SUCCESS);
        record.bytes_completed = 0x0102_0304;
        record.fault_address = 0x1122_3344_5566_7788;
        record.output_size = 77;
        record.output_bits = 3;
        record.xor_checksum = 0xBEEF;
        record.set_crc64(0xAABB_CCDD_0011_2233);
        let bytes = record.to_bytes();
        assert_eq!(bytes[0], status::SUCCESS);
        assert_eq!(&bytes[4..8], &[4, 3, 2, 1]);
        assert_eq!(CompletionRecord::from_bytes(&bytes), record);
        assert_eq!(record.crc, 0x0011_2233);
    }

    #[test]
    fn test_trivial_completion() {
        let record = CompletionRecord::trivial(4096);
        assert_eq!(record.status, 0xFF);
        assert!(record.is_trivial());
        let result = record.to_result().unwrap();
        assert_eq!(result.status, Status::MoreInputNeeded);
        assert_eq!(result.consumed, 4096);
        assert_eq!(result.produced, 0);
    }

    #[test]
    fn test_error_statuses() {
        let mut record = CompletionRecord::with_status(status::PAGE_FAULT);
        record.fault_info = 2;
        record.fault_address = 0x7000;
        assert!(matches!(
            record.to_result(),
            Err(AccelError::PageFault { fault_info: 2, address: 0x7000 })
        ));

        let record = CompletionRecord::with_status(status::DEVICE_ERROR);
        assert!(matches!(record.to_result(), Err(AccelError::Device { status: 0x1F, .. })));

        let mut record = CompletionRecord::with_status(status::DATA_ERROR);
        record.error_code = error_code::TRUNCATED;
        assert!(matches!(
            record.to_result(),
            Err(AccelError::Engine(Error::UnexpectedEof { .. }))
        ));

        let mut record = CompletionRecord::with_status(status::DATA_ERROR);
        record.error_code = error_code::CHECKSUM;
        record.max_last_agg = 0x1111_2222;
        record.crc = 0x3333_4444;
        match record.to_result() {
            Err(AccelError::Engine(e)) => {
                assert!(e.is_integrity_failure());
                assert!(matches!(
                    e,
                    Error::ChecksumMismatch { expected: 0x1111_2222, actual: 0x3333_4444 }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_handle_written_once() {
        let handle = CompletionHandle::new();
        assert!(handle.poll().is_none());
        assert!(handle.complete(Completion {
            record: CompletionRecord::with_status(status::SUCCESS),
            output: vec![1, 2, 3],
        }));
        assert!(!handle.complete(Completion::default()));
        assert_eq!(handle.poll().unwrap().output, vec![1, 2, 3]);
    }

    #[test]
    fn test_wait_times_out() {
        let handle = CompletionHandle::new();
        let err = handle.wait(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, AccelError::Timeout(_)));
    }

    #[test]
    fn test_wait_observes_other_thread() {
        let handle = CompletionHandle::new();
        let writer = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            writer.complete(Completion {
                record: CompletionRecord::trivial(1),
                output: Vec::new(),
            });
        });
        let completion = handle.wait(Duration::from_secs(5)).unwrap();
        assert!(completion.record.is_trivial());
        t.join().unwrap();
    }
}
