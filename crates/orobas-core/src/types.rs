//! Job ABI type definitions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compression level presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompressionLevel {
    /// Greedy hash matching. The only level the accelerator implements.
    #[default]
    Default,

    /// Hash chains with lazy matching (software only).
    High,
}

impl CompressionLevel {
    /// Convert to numeric level.
    pub fn to_level(self) -> i32 {
        match self {
            CompressionLevel::Default => 1,
            CompressionLevel::High => 3,
        }
    }

    /// Create from numeric level.
    pub fn from_level(level: i32) -> Result<Self> {
        match level {
            1 => Ok(CompressionLevel::Default),
            3 => Ok(CompressionLevel::High),
            _ => Err(Error::config(format!("unsupported compression level {level}"))),
        }
    }
}

/// Huffman coding mode of a compression job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompressionMode {
    /// RFC 1951 fixed codes.
    Fixed,
    /// Per-block tables built from block statistics.
    #[default]
    Dynamic,
    /// Caller table, block header emitted.
    Static,
    /// Caller table, no block header; decompressor must hold the same table.
    Canned,
    /// Raw stored blocks only.
    Stored,
}

impl CompressionMode {
    /// Derive the mode from job flags and table presence.
    pub fn from_flags(flags: JobFlags, has_table: bool) -> Result<Self> {
        let requested = [
            flags.contains(JobFlags::DYNAMIC_HUFFMAN),
            flags.contains(JobFlags::CANNED_MODE),
            flags.contains(JobFlags::STORED),
        ];
        if requested.iter().filter(|&&set| set).count() > 1 {
            return Err(Error::config(
                "dynamic, canned and stored modes are mutually exclusive",
            ));
        }

        if flags.contains(JobFlags::DYNAMIC_HUFFMAN) {
            Ok(CompressionMode::Dynamic)
        } else if flags.contains(JobFlags::STORED) {
            Ok(CompressionMode::Stored)
        } else if flags.contains(JobFlags::CANNED_MODE) {
            if !has_table {
                return Err(Error::config("canned mode requires a huffman table"));
            }
            Ok(CompressionMode::Canned)
        } else if has_table {
            Ok(CompressionMode::Static)
        } else {
            Ok(CompressionMode::Fixed)
        }
    }

    /// Flags that select this mode.
    pub fn flags(self) -> JobFlags {
        match self {
            CompressionMode::Dynamic => JobFlags::DYNAMIC_HUFFMAN,
            CompressionMode::Canned => JobFlags::CANNED_MODE,
            CompressionMode::Stored => JobFlags::STORED,
            CompressionMode::Fixed | CompressionMode::Static => JobFlags::empty(),
        }
    }
}

/// Stream container around the raw DEFLATE data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Framing {
    /// Raw DEFLATE (RFC 1951).
    #[default]
    Raw,
    /// Gzip wrapper (RFC 1952), 10-byte header and 8-byte trailer.
    Gzip,
    /// Zlib wrapper (RFC 1950), 2-byte header and 4-byte trailer.
    Zlib,
}

impl Framing {
    /// Derive framing from job flags.
    pub fn from_flags(flags: JobFlags) -> Result<Self> {
        match (
            flags.contains(JobFlags::GZIP_MODE),
            flags.contains(JobFlags::ZLIB_MODE),
        ) {
            (true, true) => Err(Error::config("gzip and zlib framing are mutually exclusive")),
            (true, false) => Ok(Framing::Gzip),
            (false, true) => Ok(Framing::Zlib),
            (false, false) => Ok(Framing::Raw),
        }
    }

    /// Flags that select this framing.
    pub fn flags(self) -> JobFlags {
        match self {
            Framing::Raw => JobFlags::empty(),
            Framing::Gzip => JobFlags::GZIP_MODE,
            Framing::Zlib => JobFlags::ZLIB_MODE,
        }
    }

    /// Header length in bytes.
    pub fn header_len(self) -> usize {
        match self {
            Framing::Raw => 0,
            Framing::Gzip => 10,
            Framing::Zlib => 2,
        }
    }

    /// Trailer length in bytes.
    pub fn trailer_len(self) -> usize {
        match self {
            Framing::Raw => 0,
            Framing::Gzip => 8,
            Framing::Zlib => 4,
        }
    }
}

/// Which backend executes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionPath {
    /// General-purpose core.
    Software,
    /// Fixed-function accelerator.
    Hardware,
    /// Prefer hardware, fall back to software where allowed.
    #[default]
    Auto,
}

/// Operation code of a job or descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Decompress,
    Compress,
    Crc64,
    Scan,
    Extract,
    Select,
    Expand,
}

impl Operation {
    /// All operation codes, in capability-table order.
    pub const ALL: [Operation; 7] = [
        Operation::Decompress,
        Operation::Compress,
        Operation::Crc64,
        Operation::Scan,
        Operation::Extract,
        Operation::Select,
        Operation::Expand,
    ];

    /// Position in [`Operation::ALL`].
    pub fn index(self) -> usize {
        match self {
            Operation::Decompress => 0,
            Operation::Compress => 1,
            Operation::Crc64 => 2,
            Operation::Scan => 3,
            Operation::Extract => 4,
            Operation::Select => 5,
            Operation::Expand => 6,
        }
    }

    /// Hardware operation code as written into descriptors.
    pub fn opcode(self) -> u8 {
        match self {
            Operation::Decompress => 0x42,
            Operation::Compress => 0x43,
            Operation::Crc64 => 0x44,
            Operation::Scan => 0x50,
            Operation::Extract => 0x52,
            Operation::Select => 0x53,
            Operation::Expand => 0x56,
        }
    }

    /// Whether this is an analytics filter.
    pub fn is_filter(self) -> bool {
        matches!(
            self,
            Operation::Scan | Operation::Extract | Operation::Select | Operation::Expand
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Decompress => "decompress",
            Operation::Compress => "compress",
            Operation::Crc64 => "crc64",
            Operation::Scan => "scan",
            Operation::Extract => "extract",
            Operation::Select => "select",
            Operation::Expand => "expand",
        }
    }
}

bitflags::bitflags! {
    /// Job flag bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct JobFlags: u32 {
        /// First call of a stream; container header is emitted.
        const FIRST = 1 << 0;
        /// Last call of a stream; final block and trailer are emitted.
        const LAST = 1 << 1;
        /// Skip re-decompression of produced output.
        const OMIT_VERIFY = 1 << 2;
        /// Build per-block Huffman tables.
        const DYNAMIC_HUFFMAN = 1 << 3;
        /// Gzip framing.
        const GZIP_MODE = 1 << 4;
        /// Zlib framing.
        const ZLIB_MODE = 1 << 5;
        /// Header-less blocks with a pre-shared table.
        const CANNED_MODE = 1 << 6;
        /// Stored blocks only.
        const STORED = 1 << 7;
        /// Big-endian 16-bit packed stream.
        const BIG_ENDIAN = 1 << 8;
    }
}

impl JobFlags {
    /// Both FIRST and LAST: the call is a whole stream.
    pub fn is_single_shot(self) -> bool {
        self.contains(JobFlags::FIRST | JobFlags::LAST)
    }
}

/// Outcome of one engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Terminal state reached.
    #[default]
    Done,
    /// All input consumed; the operation is not logically complete.
    MoreInputNeeded,
    /// Output space exhausted; call again with a fresh output buffer.
    MoreOutputNeeded,
}

impl Status {
    pub fn is_suspended(self) -> bool {
        !matches!(self, Status::Done)
    }
}

/// Filter aggregates reported alongside analytics output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Aggregates {
    /// Index of the first set bit (or minimum value).
    pub min_first: u32,
    /// Index of the last set bit (or maximum value).
    pub max_last: u32,
    /// Number of set bits (or sum).
    pub sum: u32,
}

/// Common result contract returned by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationResult {
    pub status: Status,
    /// Input bytes consumed by this call.
    pub consumed: usize,
    /// Output bytes produced by this call.
    pub produced: usize,
    /// Valid bits in the last output byte (0 when byte-aligned).
    pub last_bit_offset: u8,
    /// CRC32 over all input consumed so far.
    pub crc32: u32,
    /// XOR checksum over all input consumed so far.
    pub xor_checksum: u16,
    /// CRC64 result for checksum jobs.
    pub crc64: u64,
    pub aggregates: Aggregates,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(
            CompressionMode::from_flags(JobFlags::empty(), false).unwrap(),
            CompressionMode::Fixed
        );
        assert_eq!(
            CompressionMode::from_flags(JobFlags::empty(), true).unwrap(),
            CompressionMode::Static
        );
        assert_eq!(
            CompressionMode::from_flags(JobFlags::DYNAMIC_HUFFMAN, false).unwrap(),
            CompressionMode::Dynamic
        );
        assert!(CompressionMode::from_flags(JobFlags::CANNED_MODE, false).is_err());
        assert!(
            CompressionMode::from_flags(JobFlags::CANNED_MODE | JobFlags::STORED, true).is_err()
        );
    }

    #[test]
    fn test_framing_flags() {
        assert_eq!(Framing::from_flags(JobFlags::GZIP_MODE).unwrap(), Framing::Gzip);
        assert!(Framing::from_flags(JobFlags::GZIP_MODE | JobFlags::ZLIB_MODE).is_err());
        assert_eq!(Framing::Zlib.header_len() + Framing::Zlib.trailer_len(), 6);
    }

    #[test]
    fn test_operation_indices() {
        for (i, op) in Operation::ALL.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
        assert!(Operation::Select.is_filter());
        assert!(!Operation::Crc64.is_filter());
    }

    #[test]
    fn test_level_roundtrip() {
        for level in [CompressionLevel::Default, CompressionLevel::High] {
            assert_eq!(CompressionLevel::from_level(level.to_level()).unwrap(), level);
        }
        assert!(CompressionLevel::from_level(9).is_err());
    }
}
