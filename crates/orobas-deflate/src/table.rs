//! Huffman table representations and lossless conversion between them.
//!
//! - [`HuffmanTable`] - compact form: literal/length and distance code lengths
//! - [`FlatTable`] - accelerator layout: one packed `u32` per symbol
//! - [`Histogram`] - symbol statistics a table is built from
//! - [`DecompressionTable`] - lookup decoders for the inflater

use orobas_core::{Error, Result};

use crate::huffman::{
    build_code_lengths, canonical_codes, distance_code, length_code, validate_lengths,
    HuffmanDecoder, HuffmanEncoder, DIST_SYMBOLS, END_OF_BLOCK, FIXED_DIST_LENGTHS,
    FIXED_LIT_LENGTHS, LIT_LEN_SYMBOLS, MAX_BITS,
};

/// Bit position of the code length inside a flat entry.
const FLAT_LEN_SHIFT: u32 = 15;

/// Mask of the code inside a flat entry.
const FLAT_CODE_MASK: u32 = (1 << FLAT_LEN_SHIFT) - 1;

/// Serialized size of a [`FlatTable`].
pub const FLAT_TABLE_BYTES: usize = (LIT_LEN_SYMBOLS + DIST_SYMBOLS) * 4;

/// Symbol statistics for one block or sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    pub lit_len: [u32; LIT_LEN_SYMBOLS],
    pub dist: [u32; DIST_SYMBOLS],
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            lit_len: [0; LIT_LEN_SYMBOLS],
            dist: [0; DIST_SYMBOLS],
        }
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_literal(&mut self, byte: u8) {
        self.lit_len[byte as usize] += 1;
    }

    #[inline]
    pub fn record_match(&mut self, length: usize, distance: usize) {
        self.lit_len[257 + length_code(length)] += 1;
        self.dist[distance_code(distance)] += 1;
    }

    pub fn record_end_of_block(&mut self) {
        self.lit_len[END_OF_BLOCK] += 1;
    }

    /// Literal-only statistics of a sample.
    pub fn from_literals(data: &[u8]) -> Self {
        let mut histogram = Self::new();
        for &byte in data {
            histogram.record_literal(byte);
        }
        histogram.record_end_of_block();
        histogram
    }

    /// Give every symbol a non-zero count so the built table can encode any
    /// input. Used for tables shared across streams (static and canned).
    pub fn fill_missing(&mut self) {
        for count in self.lit_len.iter_mut().chain(self.dist.iter_mut()) {
            if *count == 0 {
                *count = 1;
            }
        }
    }
}

/// Compact Huffman table: code lengths only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    lit_len: [u8; LIT_LEN_SYMBOLS],
    dist: [u8; DIST_SYMBOLS],
    fixed: bool,
}

impl HuffmanTable {
    /// RFC 1951 fixed table.
    pub fn fixed() -> Self {
        let mut lit_len = [0u8; LIT_LEN_SYMBOLS];
        lit_len.copy_from_slice(&FIXED_LIT_LENGTHS[..LIT_LEN_SYMBOLS]);
        let mut dist = [0u8; DIST_SYMBOLS];
        dist.copy_from_slice(&FIXED_DIST_LENGTHS[..DIST_SYMBOLS]);
        Self {
            lit_len,
            dist,
            fixed: true,
        }
    }

    /// Whether this is the RFC 1951 fixed table.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Lengths the canonical codes are assigned from. The fixed code also
    /// counts its unused symbols 286, 287 and 30, 31.
    fn code_lengths(&self) -> (&[u8], &[u8]) {
        if self.fixed {
            (&FIXED_LIT_LENGTHS[..], &FIXED_DIST_LENGTHS[..])
        } else {
            (&self.lit_len[..], &self.dist[..])
        }
    }

    /// Build from explicit code lengths.
    pub fn from_lengths(lit_len: &[u8], dist: &[u8]) -> Result<Self> {
        if lit_len.len() > LIT_LEN_SYMBOLS || dist.len() > DIST_SYMBOLS {
            return Err(Error::corrupted("too many code lengths"));
        }
        validate_lengths(lit_len, MAX_BITS)?;
        validate_lengths(dist, MAX_BITS)?;
        if lit_len.get(END_OF_BLOCK).copied().unwrap_or(0) == 0 {
            return Err(Error::corrupted("table has no end-of-block code"));
        }

        let mut table = Self {
            lit_len: [0; LIT_LEN_SYMBOLS],
            dist: [0; DIST_SYMBOLS],
            fixed: false,
        };
        table.lit_len[..lit_len.len()].copy_from_slice(lit_len);
        table.dist[..dist.len()].copy_from_slice(dist);
        Ok(table)
    }

    /// Build a table from statistics.
    pub fn from_histogram(histogram: &Histogram) -> Self {
        let mut lit_freq = histogram.lit_len;
        lit_freq[END_OF_BLOCK] = lit_freq[END_OF_BLOCK].max(1);

        let mut lit = build_code_lengths(&lit_freq, MAX_BITS as u8);
        let mut dist = build_code_lengths(&histogram.dist, MAX_BITS as u8);
        complete_degenerate(&mut lit);
        complete_degenerate(&mut dist);

        let mut table = Self {
            lit_len: [0; LIT_LEN_SYMBOLS],
            dist: [0; DIST_SYMBOLS],
            fixed: false,
        };
        table.lit_len.copy_from_slice(&lit);
        table.dist.copy_from_slice(&dist);
        table
    }

    pub fn lit_len_lengths(&self) -> &[u8] {
        &self.lit_len
    }

    pub fn dist_lengths(&self) -> &[u8] {
        &self.dist
    }

    /// Encoders for compression.
    pub fn encoders(&self) -> (HuffmanEncoder, HuffmanEncoder) {
        let (lit_len, dist) = self.code_lengths();
        (HuffmanEncoder::from_lengths(lit_len), HuffmanEncoder::from_lengths(dist))
    }

    /// Size in bits of the symbols in `histogram` under this table, or
    /// `None` when some used symbol has no code.
    pub fn encoded_bits(&self, histogram: &Histogram) -> Option<u64> {
        use crate::huffman::{DISTANCE_EXTRA_BITS, LENGTH_EXTRA_BITS};

        let mut bits = 0u64;
        for (symbol, &count) in histogram.lit_len.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let len = self.lit_len[symbol];
            if len == 0 {
                return None;
            }
            let extra = if symbol > END_OF_BLOCK {
                LENGTH_EXTRA_BITS[symbol - 257]
            } else {
                0
            };
            bits += count as u64 * (len as u64 + extra as u64);
        }
        for (symbol, &count) in histogram.dist.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let len = self.dist[symbol];
            if len == 0 {
                return None;
            }
            bits += count as u64 * (len as u64 + DISTANCE_EXTRA_BITS[symbol] as u64);
        }
        Some(bits)
    }

    /// Convert to the accelerator's flat layout.
    pub fn to_flat(&self) -> FlatTable {
        let (lit_len, dist) = self.code_lengths();
        let mut flat = FlatTable::default();
        for (entry, (&len, code)) in flat
            .lit_len
            .iter_mut()
            .zip(lit_len.iter().zip(canonical_codes(lit_len)))
        {
            *entry = pack_flat(len, code);
        }
        for (entry, (&len, code)) in flat
            .dist
            .iter_mut()
            .zip(dist.iter().zip(canonical_codes(dist)))
        {
            *entry = pack_flat(len, code);
        }
        flat
    }

    /// Rebuild from the flat layout, rejecting codes that are not the
    /// canonical codes of their lengths.
    pub fn from_flat(flat: &FlatTable) -> Result<Self> {
        let lit: Vec<u8> = flat.lit_len.iter().map(|&e| flat_len(e)).collect();
        let dist: Vec<u8> = flat.dist.iter().map(|&e| flat_len(e)).collect();
        let table = Self::from_lengths(&lit, &dist)?;
        let fixed = Self::fixed();
        if table.lit_len == fixed.lit_len && table.dist == fixed.dist && fixed.to_flat() == *flat {
            return Ok(fixed);
        }

        let expected = table.to_flat();
        if expected != *flat {
            return Err(Error::corrupted("flat table codes are not canonical"));
        }
        Ok(table)
    }

    /// Decoders for inflate.
    pub fn to_decompression_table(&self) -> Result<DecompressionTable> {
        let (lit_len, dist) = self.code_lengths();
        Ok(DecompressionTable {
            lit_len: HuffmanDecoder::from_lengths(lit_len)?,
            dist: HuffmanDecoder::from_lengths(dist)?,
        })
    }
}

/// Pad a code with fewer than two symbols to a complete one-bit code, which
/// every inflater accepts.
pub(crate) fn complete_degenerate(lengths: &mut [u8]) {
    let used = lengths.iter().filter(|&&l| l > 0).count();
    if used >= 2 {
        return;
    }
    for len in lengths.iter_mut().filter(|l| **l == 0).take(2 - used) {
        *len = 1;
    }
    if used == 1 {
        for len in lengths.iter_mut().filter(|l| **l > 0) {
            *len = 1;
        }
    }
}

#[inline]
fn pack_flat(len: u8, code: u16) -> u32 {
    if len == 0 {
        0
    } else {
        ((len as u32) << FLAT_LEN_SHIFT) | (code as u32 & FLAT_CODE_MASK)
    }
}

#[inline]
fn flat_len(entry: u32) -> u8 {
    (entry >> FLAT_LEN_SHIFT) as u8
}

/// Accelerator table layout: `(length << 15) | canonical_code` per symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatTable {
    pub lit_len: [u32; LIT_LEN_SYMBOLS],
    pub dist: [u32; DIST_SYMBOLS],
}

impl Default for FlatTable {
    fn default() -> Self {
        Self {
            lit_len: [0; LIT_LEN_SYMBOLS],
            dist: [0; DIST_SYMBOLS],
        }
    }
}

impl FlatTable {
    /// Little-endian image as written into device memory.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.lit_len
            .iter()
            .chain(self.dist.iter())
            .flat_map(|entry| entry.to_le_bytes())
            .collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FLAT_TABLE_BYTES {
            return Err(Error::corrupted(format!(
                "flat table image is {} bytes, expected {}",
                bytes.len(),
                FLAT_TABLE_BYTES
            )));
        }
        let mut words = bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));

        let mut flat = Self::default();
        for entry in flat.lit_len.iter_mut().chain(flat.dist.iter_mut()) {
            *entry = words.next().unwrap_or(0);
        }
        Ok(flat)
    }
}

/// Table in decompression form.
#[derive(Debug, Clone)]
pub struct DecompressionTable {
    pub lit_len: HuffmanDecoder,
    pub dist: HuffmanDecoder,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> HuffmanTable {
        let text = b"the engine converts tables losslessly between representations";
        let mut histogram = Histogram::from_literals(text);
        histogram.record_match(4, 17);
        histogram.record_match(258, 30000);
        HuffmanTable::from_histogram(&histogram)
    }

    #[test]
    fn test_fixed_flat_roundtrip() {
        let fixed = HuffmanTable::fixed();
        let flat = fixed.to_flat();
        // 'A' has the 8-bit code 0x30 + 65.
        assert_eq!(flat.lit_len[65], (8 << 15) | (0x30 + 65));
        // 144..=255 follow all 152 eight-bit codes, 286 and 287 included.
        assert_eq!(flat.lit_len[144], (9 << 15) | 0x190);
        assert_eq!(flat.lit_len[200], (9 << 15) | (0x190 + 56));
        assert_eq!(flat.lit_len[280], (8 << 15) | 0xC0);
        assert_eq!(flat.dist[29], (5 << 15) | 29);
        assert_eq!(HuffmanTable::from_flat(&flat).unwrap(), fixed);
    }

    #[test]
    fn test_histogram_flat_bytes_roundtrip() {
        let table = sample_table();
        let bytes = table.to_flat().to_bytes();
        assert_eq!(bytes.len(), FLAT_TABLE_BYTES);
        let back = HuffmanTable::from_flat(&FlatTable::from_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_non_canonical_flat_rejected() {
        let mut flat = HuffmanTable::fixed().to_flat();
        flat.lit_len[0] ^= 1;
        assert!(HuffmanTable::from_flat(&flat).is_err());
        assert!(FlatTable::from_bytes(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_histogram_table_has_used_codes() {
        let table = sample_table();
        assert!(table.lit_len_lengths()[b't' as usize] > 0);
        assert!(table.lit_len_lengths()[END_OF_BLOCK] > 0);
        assert!(table.lit_len_lengths()[b'Z' as usize] == 0);
        assert!(table.to_decompression_table().is_ok());
    }

    #[test]
    fn test_fill_missing_covers_everything() {
        let mut histogram = Histogram::from_literals(b"aaaa");
        histogram.fill_missing();
        let table = HuffmanTable::from_histogram(&histogram);
        assert!(table.lit_len_lengths().iter().all(|&l| l > 0));
        assert!(table.dist_lengths().iter().all(|&l| l > 0));
    }

    #[test]
    fn test_encoded_bits() {
        let fixed = HuffmanTable::fixed();
        let histogram = Histogram::from_literals(b"AB");
        // two 8-bit literals plus the 7-bit end-of-block code
        assert_eq!(fixed.encoded_bits(&histogram), Some(23));

        let sparse = HuffmanTable::from_histogram(&Histogram::from_literals(b"A"));
        assert_eq!(sparse.encoded_bits(&Histogram::from_literals(b"B")), None);
    }
}
