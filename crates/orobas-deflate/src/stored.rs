//! Stored (uncompressed) DEFLATE blocks.
//!
//! Layout of each block: a 3-bit marker (BFINAL, BTYPE=00) padded to the
//! byte boundary, LEN as u16 LE, NLEN = !LEN, then LEN raw bytes. The marker
//! of the first block continues a partially filled output byte: with a start
//! bit offset of 4 or less it fits in that byte, otherwise it spills into a
//! second one.

use orobas_core::{ByteSink, Error, Result};

/// Largest payload of one stored block.
pub const MAX_STORED_LEN: usize = 0xFFFF;

/// LEN and NLEN.
pub const STORED_LEN_BYTES: usize = 4;

/// Marker byte plus LEN and NLEN.
pub const STORED_HEADER_BYTES: usize = 1 + STORED_LEN_BYTES;

/// Largest start offset at which the 3-bit marker still fits the partial byte.
const MAX_PACKED_MARKER_OFFSET: u8 = 4;

/// Stored blocks needed for `len` bytes (an empty payload still takes one).
#[inline]
pub fn stored_block_count(len: usize) -> usize {
    len.div_ceil(MAX_STORED_LEN).max(1)
}

/// Exact output bytes for `len` payload bytes, counted from the partially
/// filled byte at `start_bit_offset` (which is included in the count).
pub fn stored_size_needed(len: usize, start_bit_offset: u8) -> usize {
    let spill = usize::from(start_bit_offset > MAX_PACKED_MARKER_OFFSET);
    len + stored_block_count(len) * STORED_HEADER_BYTES + spill
}

/// Encode into `out`, which must hold [`stored_size_needed`] bytes and whose
/// first byte carries the `start_bit_offset` bits already emitted.
/// Returns the number of bytes used.
fn encode_stored_blocks(out: &mut [u8], data: &[u8], start_bit_offset: u8, is_final: bool) -> usize {
    let blocks = stored_block_count(data.len());
    let mut pos = 0;
    let mut offset = start_bit_offset.min(7);

    for index in 0..blocks {
        let start = index * MAX_STORED_LEN;
        let end = (start + MAX_STORED_LEN).min(data.len());
        let payload = &data[start.min(end)..end];
        let bfinal = u8::from(is_final && index + 1 == blocks);

        let kept = out[pos] & ((1u16 << offset) - 1) as u8;
        out[pos] = kept | (bfinal << offset);
        pos += 1;
        if offset > MAX_PACKED_MARKER_OFFSET {
            // BTYPE bits are zero, so the spilled byte is padding only.
            out[pos] = 0;
            pos += 1;
        }
        offset = 0;

        let len = payload.len() as u16;
        out[pos..pos + 2].copy_from_slice(&len.to_le_bytes());
        out[pos + 2..pos + 4].copy_from_slice(&(!len).to_le_bytes());
        pos += STORED_LEN_BYTES;

        out[pos..pos + payload.len()].copy_from_slice(payload);
        pos += payload.len();
    }
    pos
}

/// Write `data` as stored blocks at the sink position.
///
/// The byte at the sink position holds `start_bit_offset` bits of earlier
/// output and is completed by the first marker. When the whole sequence
/// does not fit, nothing is written, the cursor stays where it was and
/// `MoreOutputNeeded` is returned.
pub fn write_stored_blocks(
    sink: &mut ByteSink<'_>,
    data: &[u8],
    start_bit_offset: u8,
    is_final: bool,
) -> Result<usize> {
    let needed = stored_size_needed(data.len(), start_bit_offset);
    if needed > sink.available() {
        return Err(Error::MoreOutputNeeded);
    }
    let written = encode_stored_blocks(sink.spare_mut(), data, start_bit_offset, is_final);
    debug_assert_eq!(written, needed);
    sink.advance(written)?;
    Ok(written)
}

/// Append stored blocks to an in-memory buffer, continuing the partial byte
/// `(bits, count)` taken from the bit buffer.
pub fn append_stored_blocks(out: &mut Vec<u8>, data: &[u8], partial: (u8, u8), is_final: bool) {
    let (bits, count) = partial;
    let start = out.len();
    let needed = stored_size_needed(data.len(), count);
    out.resize(start + needed, 0);
    out[start] = bits;
    let written = encode_stored_blocks(&mut out[start..], data, count, is_final);
    out.truncate(start + written);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflate::inflate;

    #[test]
    fn test_size_needed() {
        assert_eq!(stored_size_needed(0, 0), 5);
        assert_eq!(stored_size_needed(10, 0), 15);
        assert_eq!(stored_size_needed(10, 4), 15);
        assert_eq!(stored_size_needed(10, 5), 16);
        assert_eq!(stored_size_needed(MAX_STORED_LEN + 1, 0), MAX_STORED_LEN + 1 + 10);
    }

    #[test]
    fn test_one_byte_short_rolls_back() {
        let data = b"rollback on overflow";
        for offset in [0u8, 3, 6] {
            let needed = stored_size_needed(data.len(), offset);
            let mut buf = vec![0xAAu8; needed - 1];
            let mut sink = ByteSink::new(&mut buf);
            let before = sink.position();
            assert!(matches!(
                write_stored_blocks(&mut sink, data, offset, true),
                Err(Error::MoreOutputNeeded)
            ));
            assert_eq!(sink.position(), before);
            assert!(buf.iter().all(|&b| b == 0xAA));

            let mut buf = vec![0u8; needed];
            let mut sink = ByteSink::new(&mut buf);
            assert_eq!(write_stored_blocks(&mut sink, data, offset, true).unwrap(), needed);
            assert_eq!(sink.position(), needed);
        }
    }

    #[test]
    fn test_marker_packing() {
        // Three bits already emitted: marker shares the byte.
        let mut buf = [0b101u8, 0, 0, 0, 0, 0];
        let mut sink = ByteSink::new(&mut buf);
        write_stored_blocks(&mut sink, b"x", 3, true).unwrap();
        assert_eq!(buf[0], 0b1101);
        assert_eq!(&buf[1..5], &[1, 0, 0xFE, 0xFF]);

        // Six bits emitted: marker spills into a second byte.
        let mut buf = [0b11_1111u8, 0xEE, 0, 0, 0, 0, 0];
        let mut sink = ByteSink::new(&mut buf);
        write_stored_blocks(&mut sink, b"y", 6, false).unwrap();
        assert_eq!(buf[0], 0b11_1111);
        assert_eq!(buf[1], 0);
        assert_eq!(&buf[2..7], &[1, 0, 0xFE, 0xFF, b'y']);
    }

    #[test]
    fn test_multi_block_roundtrip() {
        let data: Vec<u8> = (0..(MAX_STORED_LEN * 2 + 10)).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        append_stored_blocks(&mut out, &data, (0, 0), true);
        assert_eq!(out.len(), stored_size_needed(data.len(), 0));

        let mut decoded = Vec::new();
        inflate(&out, &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_empty_final_block() {
        let mut out = Vec::new();
        append_stored_blocks(&mut out, &[], (0, 0), true);
        assert_eq!(out, vec![0x01, 0x00, 0x00, 0xFF, 0xFF]);
    }
}
