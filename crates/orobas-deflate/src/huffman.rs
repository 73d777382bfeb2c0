//! Huffman coding primitives for DEFLATE (RFC 1951).
//!
//! Decoding uses a single flat lookup table indexed by reversed code bits;
//! encoding stores codes pre-reversed so they can be pushed LSB-first.

use orobas_core::bits::{low_mask64, reverse_bits};
use orobas_core::{Error, Result};

/// Maximum bits in a Huffman code.
pub const MAX_BITS: usize = 15;

/// Maximum bits in a code-length code.
pub const MAX_CL_BITS: usize = 7;

/// Literal/length symbols that may appear in a stream (0..=285).
pub const LIT_LEN_SYMBOLS: usize = 286;

/// Distance symbols that may appear in a stream (0..=29).
pub const DIST_SYMBOLS: usize = 30;

/// Code length alphabet size.
pub const CL_SYMBOLS: usize = 19;

/// End-of-block symbol.
pub const END_OF_BLOCK: usize = 256;

/// Fixed Huffman literal/length code lengths (RFC 1951 section 3.2.6).
pub const FIXED_LIT_LENGTHS: [u8; 288] = {
    let mut lengths = [0u8; 288];
    let mut i = 0;
    while i < 144 {
        lengths[i] = 8;
        i += 1;
    }
    while i < 256 {
        lengths[i] = 9;
        i += 1;
    }
    while i < 280 {
        lengths[i] = 7;
        i += 1;
    }
    while i < 288 {
        lengths[i] = 8;
        i += 1;
    }
    lengths
};

/// Fixed Huffman distance code lengths.
pub const FIXED_DIST_LENGTHS: [u8; 32] = [5; 32];

/// Order of code length codes in the dynamic header.
pub const CL_CODE_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Extra bits for length codes 257-285.
pub const LENGTH_EXTRA_BITS: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base lengths for length codes 257-285.
pub const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];

/// Extra bits for distance codes 0-29.
pub const DISTANCE_EXTRA_BITS: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Base distances for distance codes 0-29.
pub const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Length code index (0..29) for a match length.
pub fn length_code(length: usize) -> usize {
    LENGTH_BASE
        .iter()
        .rposition(|&base| length >= base as usize)
        .unwrap_or(0)
}

/// Distance code index (0..30) for a match distance.
pub fn distance_code(distance: usize) -> usize {
    DISTANCE_BASE
        .iter()
        .rposition(|&base| distance >= base as usize)
        .unwrap_or(0)
}

/// Canonical (MSB-first) codes for a set of code lengths.
pub fn canonical_codes(lengths: &[u8]) -> Vec<u16> {
    let mut bl_count = [0u32; MAX_BITS + 1];
    for &len in lengths {
        if len > 0 {
            bl_count[len as usize] += 1;
        }
    }

    let mut next_code = [0u32; MAX_BITS + 1];
    let mut code = 0u32;
    for bits in 1..=MAX_BITS {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    lengths
        .iter()
        .map(|&len| {
            if len == 0 {
                return 0;
            }
            let code = next_code[len as usize];
            next_code[len as usize] += 1;
            code as u16
        })
        .collect()
}

/// Check that code lengths describe a prefix code (Kraft sum <= 1).
pub fn validate_lengths(lengths: &[u8], max_bits: usize) -> Result<()> {
    let mut kraft = 0u64;
    for &len in lengths {
        if len as usize > max_bits {
            return Err(Error::corrupted(format!("code length {len} exceeds {max_bits}")));
        }
        if len > 0 {
            kraft += 1 << (max_bits - len as usize);
        }
    }
    if kraft > 1 << max_bits {
        return Err(Error::corrupted("over-subscribed huffman code"));
    }
    Ok(())
}

/// Build length-limited code lengths from symbol frequencies.
///
/// Symbols with zero frequency get length 0. A lone used symbol gets
/// length 1. When the optimal tree is deeper than `max_bits`, frequencies
/// are flattened and the tree rebuilt until it fits.
pub fn build_code_lengths(freq: &[u32], max_bits: u8) -> Vec<u8> {
    let mut weights: Vec<u32> = freq.to_vec();
    loop {
        if let Some(lengths) = tree_lengths(&weights, max_bits) {
            return lengths;
        }
        for w in weights.iter_mut().filter(|w| **w > 0) {
            *w = (*w >> 1) | 1;
        }
    }
}

fn tree_lengths(freq: &[u32], max_bits: u8) -> Option<Vec<u8>> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    #[derive(Clone, Copy)]
    struct Node {
        children: Option<(usize, usize)>,
        symbol: usize,
    }

    let mut heap: BinaryHeap<(Reverse<u64>, Reverse<usize>)> = BinaryHeap::new();
    let mut nodes = Vec::<Node>::new();

    for (symbol, &weight) in freq.iter().enumerate() {
        if weight == 0 {
            continue;
        }
        heap.push((Reverse(weight as u64), Reverse(nodes.len())));
        nodes.push(Node {
            children: None,
            symbol,
        });
    }

    let mut lengths = vec![0u8; freq.len()];
    match nodes.len() {
        0 => return Some(lengths),
        1 => {
            lengths[nodes[0].symbol] = 1;
            return Some(lengths);
        }
        _ => {}
    }

    while heap.len() > 1 {
        let (Reverse(a_w), Reverse(a_i)) = heap.pop()?;
        let (Reverse(b_w), Reverse(b_i)) = heap.pop()?;
        heap.push((Reverse(a_w + b_w), Reverse(nodes.len())));
        nodes.push(Node {
            children: Some((a_i, b_i)),
            symbol: usize::MAX,
        });
    }

    let (_, Reverse(root)) = heap.pop()?;
    let mut stack = vec![(root, 0u8)];
    while let Some((idx, depth)) = stack.pop() {
        match nodes[idx].children {
            Some((left, right)) => {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
            None => {
                if depth > max_bits {
                    return None;
                }
                lengths[nodes[idx].symbol] = depth;
            }
        }
    }
    Some(lengths)
}

/// Huffman decoder using a single lookup table.
#[derive(Debug, Clone)]
pub struct HuffmanDecoder {
    /// Indexed by reversed code bits, value is (symbol << 4) | bits
    table: Vec<u16>,
    table_bits: u8,
}

impl HuffmanDecoder {
    /// Build a decoder from code lengths.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self> {
        if lengths.is_empty() {
            return Err(Error::corrupted("empty code lengths"));
        }
        validate_lengths(lengths, MAX_BITS)?;

        let max_bits = lengths.iter().copied().max().unwrap_or(0);
        if max_bits == 0 {
            // Every lookup hits a zero-length entry and reports corruption.
            return Ok(Self {
                table: vec![0; 2],
                table_bits: 1,
            });
        }

        let table_bits = max_bits;
        let table_size = 1usize << table_bits;
        let mut table = vec![0u16; table_size];
        let codes = canonical_codes(lengths);

        for (symbol, (&len, &code)) in lengths.iter().zip(codes.iter()).enumerate() {
            if len == 0 {
                continue;
            }
            let reversed = reverse_bits(code as u32, len) as usize;
            let entry = ((symbol as u16) << 4) | (len as u16);
            let mut index = reversed;
            while index < table_size {
                table[index] = entry;
                index += 1 << len;
            }
        }

        Ok(Self { table, table_bits })
    }

    /// Decode one symbol.
    ///
    /// Fails with `UnexpectedEof` without consuming anything when the code
    /// extends past the buffered input.
    #[inline]
    pub fn decode(&self, bits: &mut BitReader<'_>) -> Result<u16> {
        let (peek, available) = bits.peek(self.table_bits as usize);
        let entry = self.table[peek as usize];
        let len = (entry & 0xF) as usize;

        if len == 0 || len > available {
            if available < self.table_bits as usize {
                return Err(Error::unexpected_eof(bits.byte_pos()));
            }
            return Err(Error::corrupted("invalid huffman code"));
        }

        bits.consume(len);
        Ok(entry >> 4)
    }
}

/// Bit reader over a byte slice with an explicit bit position.
///
/// The position can be saved and restored, which is how the inflater backs
/// out of a symbol that straddles the end of the available input.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn with_position(data: &'a [u8], bit_pos: usize) -> Self {
        Self { data, bit_pos }
    }

    /// Current position in bits.
    pub fn position(&self) -> usize {
        self.bit_pos
    }

    pub fn set_position(&mut self, bit_pos: usize) {
        self.bit_pos = bit_pos;
    }

    /// Bits left in the buffer.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }

    /// Peek up to 25 bits. Returns the zero-padded value and how many of
    /// the requested bits are really present.
    #[inline]
    pub fn peek(&self, n: usize) -> (u32, usize) {
        debug_assert!(n <= 25);
        let byte = self.bit_pos / 8;
        let shift = self.bit_pos % 8;
        let mut word = 0u64;
        for i in 0..4 {
            if let Some(&b) = self.data.get(byte + i) {
                word |= (b as u64) << (8 * i);
            }
        }
        let value = ((word >> shift) & low_mask64(n as u32)) as u32;
        (value, self.remaining_bits().min(n))
    }

    #[inline]
    pub fn consume(&mut self, n: usize) {
        self.bit_pos += n;
    }

    /// Read `n` bits, or fail without consuming.
    #[inline]
    pub fn read_bits(&mut self, n: usize) -> Result<u32> {
        let (value, available) = self.peek(n);
        if available < n {
            return Err(Error::unexpected_eof(self.byte_pos()));
        }
        self.consume(n);
        Ok(value)
    }

    /// Skip to the next byte boundary.
    pub fn align(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }

    /// Byte index of the next unread whole byte.
    pub fn byte_pos(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }

    /// Byte-aligned slice of up to `n` raw bytes; advances past them.
    pub fn take_aligned(&mut self, n: usize) -> &'a [u8] {
        self.align();
        let start = (self.bit_pos / 8).min(self.data.len());
        let end = (start + n).min(self.data.len());
        self.bit_pos = end * 8;
        &self.data[start..end]
    }
}

/// Huffman encoder with pre-reversed codes.
#[derive(Debug, Clone)]
pub struct HuffmanEncoder {
    codes: Vec<u16>,
    lengths: Vec<u8>,
}

impl HuffmanEncoder {
    pub fn from_lengths(lengths: &[u8]) -> Self {
        let codes = canonical_codes(lengths)
            .into_iter()
            .zip(lengths.iter())
            .map(|(code, &len)| reverse_bits(code as u32, len) as u16)
            .collect();

        Self {
            codes,
            lengths: lengths.to_vec(),
        }
    }

    /// Reversed code and length for a symbol.
    #[inline]
    pub fn get(&self, symbol: usize) -> (u32, u32) {
        (self.codes[symbol] as u32, self.lengths[symbol] as u32)
    }

    /// Whether the symbol has a code at all.
    #[inline]
    pub fn has_code(&self, symbol: usize) -> bool {
        self.lengths.get(symbol).is_some_and(|&len| len > 0)
    }
}
