//! Device-side execution of a descriptor.
//!
//! The emulated device runs every descriptor through the software engine,
//! so its output is byte-identical to the software path.

use std::sync::Mutex;

use orobas_core::{
    crc64, run_filter, ByteSink, ByteSource, CompressionLevel, Error, JobFlags, OperationResult,
    Status,
};
use orobas_deflate::{be16_adjust, to_be16, CompressState, InflateState};

use crate::descriptor::{Descriptor, Payload};
use crate::record::{error_code, status, Completion, CompletionRecord};

/// Capabilities that decide whether a descriptor can run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub generation: u8,
    pub max_transfer_size: usize,
}

/// Run `descriptor` and build its completion.
pub fn execute(descriptor: &Descriptor, limits: ExecutionLimits) -> Completion {
    if let Err(flags) = check_supported(descriptor, limits) {
        let mut record = CompletionRecord::with_status(status::INVALID_CONFIG);
        record.invalid_flags = flags;
        return Completion {
            record,
            output: Vec::new(),
        };
    }

    let outcome = match &descriptor.payload {
        Payload::Compress { options, state } => match state {
            Some(shared) => with_locked(shared, |state| compress(descriptor, state)),
            None => CompressState::new(options.clone()).and_then(|mut state| compress(descriptor, &mut state)),
        },
        Payload::Decompress { options, state } => match state {
            Some(shared) => with_locked(shared, |state| decompress(descriptor, state)),
            None => InflateState::new(options.clone()).and_then(|mut state| decompress(descriptor, &mut state)),
        },
        Payload::Crc64(params) => {
            let mut record = CompletionRecord::with_status(status::SUCCESS);
            record.bytes_completed = descriptor.input.len() as u32;
            record.set_crc64(crc64(&descriptor.input, *params));
            Ok(Completion {
                record,
                output: Vec::new(),
            })
        }
        Payload::Filter(spec) => filter(descriptor, spec),
    };

    outcome.unwrap_or_else(|e| {
        tracing::debug!(tag = descriptor.tag, error = %e, "descriptor failed on device");
        Completion {
            record: error_record(&e),
            output: Vec::new(),
        }
    })
}

/// Invalid-flags bitmask for descriptors this device rejects.
fn check_supported(descriptor: &Descriptor, limits: ExecutionLimits) -> Result<(), u64> {
    let mut invalid = 0u64;
    if descriptor.input.len() > limits.max_transfer_size {
        invalid |= 1 << 63;
    }
    if let Payload::Compress { options, .. } = &descriptor.payload {
        if options.level == CompressionLevel::High {
            invalid |= 1 << 32;
        }
        if descriptor.flags.contains(JobFlags::BIG_ENDIAN) {
            if limits.generation < 2 {
                invalid |= u64::from(JobFlags::BIG_ENDIAN.bits());
            }
            if !descriptor.flags.is_single_shot() {
                invalid |= u64::from(JobFlags::LAST.bits());
            }
        }
    }
    if invalid == 0 {
        Ok(())
    } else {
        Err(invalid)
    }
}

fn with_locked<S>(
    shared: &Mutex<S>,
    run: impl FnOnce(&mut S) -> orobas_core::Result<Completion>,
) -> orobas_core::Result<Completion> {
    let mut guard = shared.lock().map_err(|_| Error::InvalidState {
        expected: "usable state record",
        actual: "state record poisoned",
    })?;
    run(&mut guard)
}

fn compress(descriptor: &Descriptor, state: &mut CompressState) -> orobas_core::Result<Completion> {
    let mut output = vec![0u8; descriptor.output_capacity];
    let mut src = ByteSource::new(&descriptor.input);
    let mut dst = ByteSink::new(&mut output);
    let mut result = state.step(&mut src, &mut dst, descriptor.is_last())?;
    output.truncate(result.produced);

    if descriptor.flags.contains(JobFlags::BIG_ENDIAN) && result.status == Status::Done {
        let (len, bits) = be16_adjust(result.produced, result.last_bit_offset);
        if len > descriptor.output_capacity {
            result.status = Status::MoreOutputNeeded;
        } else {
            to_be16(&mut output);
            result.produced = len;
            result.last_bit_offset = bits;
        }
    }
    Ok(success(result, output))
}

fn decompress(descriptor: &Descriptor, state: &mut InflateState) -> orobas_core::Result<Completion> {
    let mut output = vec![0u8; descriptor.output_capacity];
    let mut src = ByteSource::new(&descriptor.input);
    let mut dst = ByteSink::new(&mut output);
    let result = state.step(&mut src, &mut dst, descriptor.is_last())?;
    output.truncate(result.produced);
    Ok(success(result, output))
}

fn filter(descriptor: &Descriptor, spec: &orobas_core::FilterSpec) -> orobas_core::Result<Completion> {
    let mut output = Vec::with_capacity(spec.max_output_len(descriptor.input.len()));
    let aggregates = run_filter(spec, &descriptor.input, &mut output)?;
    if output.len() > descriptor.output_capacity {
        return Err(Error::MoreOutputNeeded);
    }
    let mut record = CompletionRecord::with_status(status::SUCCESS);
    record.bytes_completed = descriptor.input.len() as u32;
    record.output_size = output.len() as u32;
    record.set_aggregates(aggregates);
    Ok(Completion { record, output })
}

fn success(result: OperationResult, output: Vec<u8>) -> Completion {
    let mut record = CompletionRecord::with_status(match result.status {
        Status::Done => status::SUCCESS,
        Status::MoreInputNeeded => status::SUCCESS_MORE_INPUT,
        Status::MoreOutputNeeded => status::OUTPUT_OVERFLOW,
    });
    record.bytes_completed = result.consumed as u32;
    record.output_size = result.produced as u32;
    record.output_bits = result.last_bit_offset;
    record.crc = result.crc32;
    record.xor_checksum = result.xor_checksum;
    Completion { record, output }
}

fn error_record(error: &Error) -> CompletionRecord {
    let (status, code) = match error {
        Error::CorruptedData { .. } => (status::DATA_ERROR, error_code::CORRUPTED),
        Error::ChecksumMismatch { .. } => (status::DATA_ERROR, error_code::CHECKSUM),
        Error::UnexpectedEof { .. } => (status::DATA_ERROR, error_code::TRUNCATED),
        Error::MoreOutputNeeded => (status::OUTPUT_OVERFLOW, error_code::NONE),
        Error::InvalidConfiguration(_) | Error::Unsupported(_) => (status::INVALID_CONFIG, error_code::NONE),
        _ => (status::DEVICE_ERROR, error_code::NONE),
    };
    let mut record = CompletionRecord::with_status(status);
    record.error_code = code;
    match *error {
        Error::UnexpectedEof { bytes_read } => record.bytes_completed = bytes_read as u32,
        // The trailer value rides in the aggregate slot, the computed one in `crc`.
        Error::ChecksumMismatch { expected, actual } => {
            record.max_last_agg = expected;
            record.crc = actual;
        }
        _ => {}
    }
    record
}
