//! Incremental checksums: CRC32 (gzip polynomial), XOR, Adler-32 and CRC64.
//!
//! Every accumulator here can be fed in arbitrary pieces and yields the same
//! value as a single pass over the concatenated data.

use serde::{Deserialize, Serialize};

/// Reflected gzip polynomial.
const CRC32_POLY: u32 = 0xEDB8_8320;

/// CRC-32 lookup table.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = CRC32_POLY ^ (crc >> 1);
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Continue a finalized CRC32 value over more data.
pub fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    let mut reg = !crc;
    for &byte in data {
        let index = ((reg ^ byte as u32) & 0xFF) as usize;
        reg = CRC32_TABLE[index] ^ (reg >> 8);
    }
    !reg
}

/// CRC32 of a whole buffer.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0, data)
}

fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0;
    let mut i = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[i];
        }
        vec >>= 1;
        i += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for n in 0..32 {
        square[n] = gf2_matrix_times(mat, mat[n]);
    }
}

/// CRC32 of `A || B` given `crc32(A)`, `crc32(B)` and `len(B)`.
pub fn crc32_combine(crc1: u32, crc2: u32, len2: u64) -> u32 {
    if len2 == 0 {
        return crc1;
    }

    let mut crc1 = crc1;
    let mut len2 = len2;
    let mut even = [0u32; 32];
    let mut odd = [0u32; 32];

    // Operator for one zero bit.
    odd[0] = CRC32_POLY;
    let mut row = 1u32;
    for entry in odd.iter_mut().skip(1) {
        *entry = row;
        row <<= 1;
    }

    // Two, then four zero bits.
    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

/// Running CRC32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crc32 {
    value: u32,
    len: u64,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = crc32_update(self.value, data);
        self.len += data.len() as u64;
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append another accumulator that covered the bytes right after ours.
    pub fn combine(&mut self, other: &Crc32) {
        self.value = crc32_combine(self.value, other.value, other.len);
        self.len += other.len;
    }
}

/// Running XOR checksum over little-endian 16-bit words.
///
/// A byte at an even absolute offset lands in the low half of the word, a
/// byte at an odd offset in the high half, so splitting the data at odd
/// boundaries does not change the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XorChecksum {
    value: u16,
    odd: bool,
}

impl XorChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut data = data;
        if self.odd {
            if let Some((&first, rest)) = data.split_first() {
                self.value ^= (first as u16) << 8;
                data = rest;
                self.odd = false;
            }
        }

        let mut pairs = data.chunks_exact(2);
        for pair in &mut pairs {
            self.value ^= u16::from_le_bytes([pair[0], pair[1]]);
        }
        if let [last] = pairs.remainder() {
            self.value ^= *last as u16;
            self.odd = true;
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    /// Append a checksum computed independently over the following bytes.
    pub fn combine(&mut self, other: &XorChecksum) {
        if self.odd {
            self.value ^= other.value.swap_bytes();
        } else {
            self.value ^= other.value;
        }
        self.odd ^= other.odd;
    }
}

/// XOR checksum of a whole buffer.
pub fn xor_checksum(data: &[u8]) -> u16 {
    let mut xor = XorChecksum::new();
    xor.update(data);
    xor.value()
}

/// Largest n such that 255n(n+1)/2 + (n+1)(BASE-1) fits in 32 bits.
const ADLER_NMAX: usize = 5552;
const ADLER_BASE: u32 = 65521;

/// Running Adler-32 for the zlib trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self { a: 1, b: 0 }
    }
}

impl Adler32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(ADLER_NMAX) {
            for &byte in chunk {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= ADLER_BASE;
            self.b %= ADLER_BASE;
        }
    }

    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// CRC64 parameters of a checksum job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crc64Params {
    /// Polynomial in normal (MSB-first) notation.
    pub poly: u64,
    /// Process bits LSB-first.
    pub reflected: bool,
    /// Start from all ones and invert the result.
    pub inverted: bool,
}

impl Default for Crc64Params {
    fn default() -> Self {
        // ECMA-182
        Self {
            poly: 0x42F0_E1EB_A9EA_3693,
            reflected: false,
            inverted: false,
        }
    }
}

/// CRC64 of a whole buffer.
pub fn crc64(data: &[u8], params: Crc64Params) -> u64 {
    let mut table = [0u64; 256];
    if params.reflected {
        let poly = params.poly.reverse_bits();
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u64;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            }
            *entry = crc;
        }
    } else {
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u64) << 56;
            for _ in 0..8 {
                crc = if crc & (1 << 63) != 0 {
                    (crc << 1) ^ params.poly
                } else {
                    crc << 1
                };
            }
            *entry = crc;
        }
    }

    let mut crc = if params.inverted { u64::MAX } else { 0 };
    for &byte in data {
        crc = if params.reflected {
            table[((crc ^ byte as u64) & 0xFF) as usize] ^ (crc >> 8)
        } else {
            table[(((crc >> 56) ^ byte as u64) & 0xFF) as usize] ^ (crc << 8)
        };
    }

    if params.inverted {
        !crc
    } else {
        crc
    }
}
