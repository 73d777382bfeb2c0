//! # Orobas Core
//!
//! Shared types, checksums and bit primitives for the Orobas dual-backend
//! DEFLATE engine.
//!
//! Orobas is named after the 55th demon of the Ars Goetia, who gives true
//! answers of things past and to come - just as every stream this engine
//! produces can be checked against its own re-decompression.
//!
//! ## Contents
//!
//! - [`JobFlags`], [`Operation`], [`ExecutionPath`], [`CompressionMode`] - the job ABI
//! - [`OperationResult`] - the result contract shared by both backends
//! - [`checksum`] - incremental CRC32, XOR, Adler-32 and CRC64
//! - [`bits`] - bit accumulator, bit reversal, [`Bitset128`]
//! - [`buffer`] - bounds-checked input/output cursors
//! - [`analytics`] - filter kernels for the analytics opcodes

pub mod analytics;
pub mod bits;
pub mod buffer;
pub mod checksum;
pub mod error;
pub mod types;

pub use analytics::{run_filter, FilterSpec};
pub use bits::{BitBuffer, Bitset128};
pub use buffer::{ByteSink, ByteSource};
pub use checksum::{crc32, crc32_combine, crc64, xor_checksum, Adler32, Crc32, Crc64Params, XorChecksum};
pub use error::{Error, Result};
pub use types::{
    Aggregates, CompressionLevel, CompressionMode, ExecutionPath, Framing, JobFlags, Operation,
    OperationResult, Status,
};
