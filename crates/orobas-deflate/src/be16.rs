//! Big-endian 16-bit packed stream layout.
//!
//! A BE16 stream is an ordinary DEFLATE stream padded to an even length,
//! whose 16-bit words have their bit order reversed. The transform is its
//! own inverse.

use orobas_core::bits::reverse_words16;

/// Renormalize `(output_bytes, last_bit_offset)` for a BE16 stream.
///
/// An odd length is padded by one byte; a byte-aligned end then becomes a
/// full trailing word (offset 8). For an even length the offset counts bits
/// in the trailing word, so a partial last byte gains the 8 bits of the
/// byte before it.
pub fn be16_adjust(output_bytes: usize, last_bit_offset: u8) -> (usize, u8) {
    if output_bytes % 2 == 1 {
        let offset = if last_bit_offset == 0 { 8 } else { last_bit_offset };
        (output_bytes + 1, offset)
    } else if last_bit_offset != 0 {
        (output_bytes, last_bit_offset + 8)
    } else {
        (output_bytes, 0)
    }
}

/// Convert a finished stream to the BE16 layout in place.
pub fn to_be16(stream: &mut Vec<u8>) {
    if stream.len() % 2 == 1 {
        stream.push(0);
    }
    reverse_words16(stream);
}

/// Undo [`to_be16`]; padding is left in place for the inflater to ignore.
pub fn from_be16(stream: &[u8]) -> Vec<u8> {
    let mut out = stream.to_vec();
    reverse_words16(&mut out);
    out
}
