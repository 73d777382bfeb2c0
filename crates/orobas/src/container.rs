//! Multi-chunk container header.
//!
//! Layout, all fields little-endian `u32`:
//!
//! ```text
//! block_size | last_block_size | block_count | compressed_size[block_count] | payloads
//! ```
//!
//! Every payload is an independent raw DEFLATE stream of one chunk.

use orobas_deflate::MAX_SAFE_INPUT;

use crate::error::{Error, Result};

/// Bytes before the per-block size table.
pub const FIXED_HEADER_LEN: usize = 12;

/// Most output a single byte of DEFLATE data can expand to.
pub const MAX_EXPANSION: u64 = 1032;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Uncompressed size of every block but the last.
    pub block_size: u32,
    pub last_block_size: u32,
    /// Compressed size of each block, in logical order.
    pub compressed_sizes: Vec<u32>,
}

impl ContainerHeader {
    /// Encoded size of a header with `block_count` blocks.
    pub fn encoded_len(block_count: usize) -> usize {
        FIXED_HEADER_LEN + 4 * block_count
    }

    pub fn block_count(&self) -> usize {
        self.compressed_sizes.len()
    }

    pub fn block_len(&self, index: usize) -> usize {
        if index + 1 == self.block_count() {
            self.last_block_size as usize
        } else {
            self.block_size as usize
        }
    }

    /// Uncompressed size of the whole container.
    pub fn original_len(&self) -> u64 {
        match self.block_count() {
            0 => 0,
            n => self.block_size as u64 * (n as u64 - 1) + self.last_block_size as u64,
        }
    }

    pub fn payload_len(&self) -> u64 {
        self.compressed_sizes.iter().map(|&s| s as u64).sum()
    }

    /// Serialize into the front of `out`.
    pub fn write_to(&self, out: &mut [u8]) -> Result<usize> {
        let bytes = self.to_bytes();
        out.get_mut(..bytes.len())
            .ok_or(Error::InvalidContainer("buffer too small for header"))?
            .copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::encoded_len(self.block_count()));
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.last_block_size.to_le_bytes());
        out.extend_from_slice(&(self.block_count() as u32).to_le_bytes());
        for size in &self.compressed_sizes {
            out.extend_from_slice(&size.to_le_bytes());
        }
        out
    }

    /// Parse and validate a header; returns it with its encoded length.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let read_u32 = |at: usize| -> Result<u32> {
            data.get(at..at + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or(Error::InvalidContainer("truncated header"))
        };

        let block_size = read_u32(0)?;
        let last_block_size = read_u32(4)?;
        let block_count = read_u32(8)? as usize;
        if block_count == 0 {
            return Err(Error::InvalidContainer("no blocks"));
        }
        let header_len = FIXED_HEADER_LEN
            .checked_add(block_count.checked_mul(4).ok_or(Error::InvalidContainer("block count overflows"))?)
            .ok_or(Error::InvalidContainer("block count overflows"))?;
        if header_len > data.len() {
            return Err(Error::InvalidContainer("truncated block size table"));
        }
        let compressed_sizes = (0..block_count)
            .map(|i| read_u32(FIXED_HEADER_LEN + 4 * i))
            .collect::<Result<Vec<_>>>()?;

        let header = Self {
            block_size,
            last_block_size,
            compressed_sizes,
        };
        if block_count > 1 && block_size == 0 {
            return Err(Error::InvalidContainer("zero block size with several blocks"));
        }
        if header.compressed_sizes.iter().any(|&s| s == 0) {
            return Err(Error::InvalidContainer("empty block payload"));
        }
        if block_size as usize > MAX_SAFE_INPUT || last_block_size as usize > MAX_SAFE_INPUT {
            return Err(Error::InvalidContainer("block size exceeds the largest chunk"));
        }
        let inflatable = header
            .compressed_sizes
            .iter()
            .enumerate()
            .all(|(i, &size)| header.block_len(i) as u64 <= size as u64 * MAX_EXPANSION);
        if !inflatable {
            return Err(Error::InvalidContainer("block size exceeds what its payload can inflate to"));
        }
        if header.payload_len() != (data.len() - header_len) as u64 {
            return Err(Error::InvalidContainer("payload length does not match block sizes"));
        }
        Ok((header, header_len))
    }

    /// Payload byte range of each block, relative to the container start.
    pub fn payload_ranges(&self, header_len: usize) -> Vec<std::ops::Range<usize>> {
        let mut offset = header_len;
        self.compressed_sizes
            .iter()
            .map(|&size| {
                let range = offset..offset + size as usize;
                offset = range.end;
                range
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContainerHeader {
        ContainerHeader {
            block_size: 1000,
            last_block_size: 1500,
            compressed_sizes: vec![10, 20, 30],
        }
    }

    #[test]
    fn test_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &1000u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &30u32.to_le_bytes());
        assert_eq!(sample().original_len(), 3500);
    }

    #[test]
    fn test_parse_validates() {
        let mut data = sample().to_bytes();
        data.extend(std::iter::repeat(0u8).take(60));
        let (header, len) = ContainerHeader::parse(&data).unwrap();
        assert_eq!(header, sample());
        assert_eq!(len, 24);
        assert_eq!(header.payload_ranges(len)[2], 54..84);

        assert!(matches!(
            ContainerHeader::parse(&data[..data.len() - 1]),
            Err(Error::InvalidContainer(_))
        ));
        assert!(ContainerHeader::parse(&data[..16]).is_err());

        let mut zero = data.clone();
        zero[8..12].copy_from_slice(&0u32.to_le_bytes());
        assert!(ContainerHeader::parse(&zero).is_err());
    }

    #[test]
    fn test_write_to_needs_room() {
        let mut out = [0xAAu8; 30];
        assert_eq!(sample().write_to(&mut out).unwrap(), 24);
        assert_eq!(&out[..24], &sample().to_bytes()[..]);
        assert_eq!(out[24], 0xAA);
        assert!(matches!(sample().write_to(&mut out[..23]), Err(Error::InvalidContainer(_))));
    }

    #[test]
    fn test_parse_rejects_impossible_block_sizes() {
        // Sixteen one-byte payloads claiming 4 GiB blocks each.
        let mut data = Vec::new();
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&16u32.to_le_bytes());
        for _ in 0..16 {
            data.extend_from_slice(&1u32.to_le_bytes());
        }
        data.extend_from_slice(&[0x03; 16]);
        assert_eq!(data.len(), 92);
        assert!(matches!(ContainerHeader::parse(&data), Err(Error::InvalidContainer(_))));

        // Within the chunk limit but beyond any inflation ratio.
        let header = ContainerHeader {
            block_size: 100_000,
            last_block_size: 10,
            compressed_sizes: vec![50, 10],
        };
        let mut data = header.to_bytes();
        data.extend(std::iter::repeat(0u8).take(60));
        assert!(matches!(ContainerHeader::parse(&data), Err(Error::InvalidContainer(_))));

        let header = ContainerHeader {
            block_size: 50 * MAX_EXPANSION as u32,
            ..header
        };
        let mut data = header.to_bytes();
        data.extend(std::iter::repeat(0u8).take(60));
        assert!(ContainerHeader::parse(&data).is_ok());
    }
}
