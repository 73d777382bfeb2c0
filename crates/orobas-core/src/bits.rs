//! Bit-level primitives: the output bit accumulator, bit reversal helpers and
//! the 128-bit capability set.

use std::ops::{BitAnd, BitAndAssign, BitOr};

/// Bits held by [`BitBuffer`] before whole bytes must be drained.
pub const BIT_BUFFER_CAPACITY: u32 = 64;

/// Largest single write accepted by [`BitBuffer::put`].
pub const MAX_PUT_BITS: u32 = 32;

/// Output bit accumulator.
///
/// Bits are appended LSB-first. `put` drains whole bytes into the sink as
/// soon as the register would otherwise overflow, so `count` stays below
/// [`BIT_BUFFER_CAPACITY`] between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitBuffer {
    acc: u64,
    count: u32,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits currently held.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append the low `n` bits of `value`.
    #[inline]
    pub fn put(&mut self, value: u32, n: u32, sink: &mut Vec<u8>) {
        debug_assert!(n <= MAX_PUT_BITS);
        if self.count + n > BIT_BUFFER_CAPACITY {
            self.drain_bytes(sink);
        }
        let value = value as u64 & low_mask64(n);
        self.acc |= value << self.count;
        self.count += n;
        if self.count >= 32 {
            self.drain_bytes(sink);
        }
    }

    /// Move every complete byte into `sink`, keeping the sub-byte tail.
    #[inline]
    pub fn drain_bytes(&mut self, sink: &mut Vec<u8>) {
        while self.count >= 8 {
            sink.push(self.acc as u8);
            self.acc >>= 8;
            self.count -= 8;
        }
    }

    /// Drain everything, zero-padding the last partial byte.
    ///
    /// Returns the number of valid bits in that last byte (0 when the buffer
    /// was already byte-aligned).
    pub fn flush_padded(&mut self, sink: &mut Vec<u8>) -> u8 {
        self.drain_bytes(sink);
        let tail = self.count as u8;
        if self.count > 0 {
            sink.push(self.acc as u8);
        }
        self.acc = 0;
        self.count = 0;
        tail
    }

    /// Sub-byte tail as `(bits, valid_count)`.
    pub fn partial_byte(&self) -> (u8, u8) {
        debug_assert!(self.count < 8);
        (self.acc as u8, self.count as u8)
    }

    /// Forget the sub-byte tail after it was written out by other means.
    pub fn clear(&mut self) {
        self.acc = 0;
        self.count = 0;
    }
}

/// Mask with the low `n` bits set (n <= 64).
#[inline]
pub fn low_mask64(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Reverse the low `bits` bits of `code`.
#[inline]
pub fn reverse_bits(code: u32, bits: u8) -> u32 {
    if bits == 0 {
        return 0;
    }
    code.reverse_bits() >> (32 - bits as u32)
}

/// Bytes needed to hold `bits` bits.
#[inline]
pub fn bits_to_bytes(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Reverse all 16 bits of every little-endian word in place.
///
/// An odd trailing byte is bit-reversed on its own; callers pad to an even
/// length first when the stream must consist of whole words.
pub fn reverse_words16(data: &mut [u8]) {
    let mut words = data.chunks_exact_mut(2);
    for pair in &mut words {
        let word = u16::from_le_bytes([pair[0], pair[1]]).reverse_bits();
        pair.copy_from_slice(&word.to_le_bytes());
    }
    if let [last] = words.into_remainder() {
        *last = last.reverse_bits();
    }
}

/// Fixed-width set of up to 128 bits, indexed from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bitset128 {
    low: u64,
    high: u64,
}

impl Bitset128 {
    pub const WIDTH: usize = 128;

    /// Empty set.
    pub const fn empty() -> Self {
        Self { low: 0, high: 0 }
    }

    /// Set with the first `n` bits on.
    pub fn with_len(n: usize) -> Self {
        let n = n.min(Self::WIDTH);
        if n <= 64 {
            Self {
                low: low_mask64(n as u32),
                high: 0,
            }
        } else {
            Self {
                low: u64::MAX,
                high: low_mask64((n - 64) as u32),
            }
        }
    }

    /// Test bit `index`; out-of-range indices read as unset.
    pub fn get(&self, index: usize) -> bool {
        match index {
            0..=63 => self.low & (1 << index) != 0,
            64..=127 => self.high & (1 << (index - 64)) != 0,
            _ => false,
        }
    }

    /// Set or clear bit `index`. Returns false when out of range.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        let (word, bit) = match index {
            0..=63 => (&mut self.low, index),
            64..=127 => (&mut self.high, index - 64),
            _ => return false,
        };
        if value {
            *word |= 1 << bit;
        } else {
            *word &= !(1 << bit);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    pub fn count(&self) -> u32 {
        self.low.count_ones() + self.high.count_ones()
    }

    /// Indices of set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::WIDTH).filter(move |&i| self.get(i))
    }
}

impl BitAnd for Bitset128 {
    type Output = Bitset128;

    fn bitand(self, rhs: Self) -> Self {
        Self {
            low: self.low & rhs.low,
            high: self.high & rhs.high,
        }
    }
}

impl BitAndAssign for Bitset128 {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitOr for Bitset128 {
    type Output = Bitset128;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            low: self.low | rhs.low,
            high: self.high | rhs.high,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_buffer_lsb_first() {
        let mut sink = Vec::new();
        let mut bits = BitBuffer::new();
        bits.put(0b0100, 4, &mut sink);
        bits.put(0b1011, 4, &mut sink);
        bits.put(0b1100_1010, 8, &mut sink);
        bits.put(0b101, 3, &mut sink);
        bits.drain_bytes(&mut sink);
        assert_eq!(sink, vec![0b1011_0100, 0b1100_1010]);
        assert_eq!(bits.partial_byte(), (0b101, 3));
        assert_eq!(bits.flush_padded(&mut sink), 3);
        assert_eq!(sink.len(), 3);
        assert!(bits.is_empty());
    }

    #[test]
    fn test_bit_buffer_never_overflows() {
        let mut sink = Vec::new();
        let mut bits = BitBuffer::new();
        for _ in 0..100 {
            bits.put(0x7FFF, 15, &mut sink);
            assert!(bits.count() < BIT_BUFFER_CAPACITY);
        }
        bits.flush_padded(&mut sink);
        assert_eq!(sink.len(), bits_to_bytes(1500));
    }

    #[test]
    fn test_reverse_bits() {
        assert_eq!(reverse_bits(0b1100, 4), 0b0011);
        assert_eq!(reverse_bits(0b1010_1010, 8), 0b0101_0101);
        assert_eq!(reverse_bits(0b1, 1), 0b1);
        assert_eq!(reverse_bits(0x1234, 0), 0);
    }

    #[test]
    fn test_reverse_words16_involution() {
        let original = [0x01u8, 0x80, 0xF0, 0x0F, 0x55];
        let mut data = original;
        reverse_words16(&mut data);
        // 0x8001 reversed is 0x8001; 0x0FF0 reversed is 0x0FF0.
        assert_eq!(&data[..4], &[0x01, 0x80, 0xF0, 0x0F]);
        reverse_words16(&mut data);
        assert_eq!(data, original);

        let mut word = [0x01u8, 0x00];
        reverse_words16(&mut word);
        assert_eq!(word, [0x00, 0x80]);
    }

    #[test]
    fn test_bitset_with_len() {
        assert!(Bitset128::with_len(0).is_empty());
        let set = Bitset128::with_len(70);
        assert_eq!(set.count(), 70);
        assert!(set.get(0) && set.get(63) && set.get(69));
        assert!(!set.get(70) && !set.get(200));
        assert_eq!(Bitset128::with_len(500).count(), 128);
    }

    #[test]
    fn test_bitset_set_get_and() {
        let mut a = Bitset128::empty();
        assert!(a.set(3, true));
        assert!(a.set(100, true));
        assert!(!a.set(128, true));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![3, 100]);

        let b = Bitset128::with_len(64);
        assert_eq!((a & b).iter().collect::<Vec<_>>(), vec![3]);
        a.set(3, false);
        assert_eq!(a.count(), 1);
    }
}
