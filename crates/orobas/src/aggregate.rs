//! CRC32 aggregation over chunks finished in any order.

use orobas_core::{crc32_combine, Crc32};

use crate::error::{Error, Result};

/// Per-chunk CRC32 values, combined in logical order.
#[derive(Debug, Clone, Default)]
pub struct CrcAggregator {
    parts: Vec<Option<(u32, u64)>>,
}

impl CrcAggregator {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            parts: vec![None; chunk_count],
        }
    }

    /// Record the CRC32 of chunk `index`, `len` bytes long.
    pub fn record(&mut self, index: usize, crc: u32, len: u64) -> Result<()> {
        let slot = self
            .parts
            .get_mut(index)
            .ok_or(Error::InvalidContainer("chunk index out of range"))?;
        *slot = Some((crc, len));
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(Option::is_some)
    }

    /// CRC32 of the concatenation, once every chunk is recorded.
    pub fn combined(&self) -> Option<u32> {
        let mut crc = Crc32::new().value();
        for part in &self.parts {
            let (part_crc, len) = (*part)?;
            crc = crc32_combine(crc, part_crc, len);
        }
        Some(crc)
    }

    pub fn total_len(&self) -> u64 {
        self.parts.iter().flatten().map(|&(_, len)| len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orobas_core::crc32;

    #[test]
    fn test_out_of_order_combination() {
        let data = b"aggregation works whatever order the chunks finish in".repeat(40);
        let chunks: Vec<&[u8]> = data.chunks(333).collect();
        let mut aggregator = CrcAggregator::new(chunks.len());
        for index in (0..chunks.len()).rev() {
            assert!(aggregator.combined().is_none());
            aggregator
                .record(index, crc32(chunks[index]), chunks[index].len() as u64)
                .unwrap();
        }
        assert!(aggregator.is_complete());
        assert_eq!(aggregator.combined(), Some(crc32(&data)));
        assert_eq!(aggregator.total_len(), data.len() as u64);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut aggregator = CrcAggregator::new(2);
        assert!(aggregator.record(2, 0, 0).is_err());
    }

    #[test]
    fn test_empty_chunks() {
        let mut aggregator = CrcAggregator::new(1);
        aggregator.record(0, crc32(b""), 0).unwrap();
        assert_eq!(aggregator.combined(), Some(0));
    }
}
