//! Worst-case output sizing.

use crate::compress::BLOCK_BUFFER_SIZE;
use crate::stored::{stored_block_count, STORED_HEADER_BYTES};

/// Largest input accepted by [`safe_compressed_size`].
pub const MAX_SAFE_INPUT: usize = (u32::MAX - 34) as usize;

/// Largest container framing overhead (gzip header and trailer).
const MAX_FRAMING_BYTES: usize = 18;

/// Byte added when a stream is padded to an even length.
const BE16_PAD_BYTES: usize = 1;

/// Output bytes that always suffice for a single-shot compression of
/// `len` bytes in any mode except canned, or 0 when `len` exceeds
/// [`MAX_SAFE_INPUT`].
///
/// Each block is written Huffman coded only when that is smaller than its
/// stored form, so a block never costs more than its stored size plus one
/// byte for a marker that spills out of a partial byte.
pub fn safe_compressed_size(len: usize) -> usize {
    if len > MAX_SAFE_INPUT {
        return 0;
    }
    let block_overhead = |block_len: usize| stored_block_count(block_len) * STORED_HEADER_BYTES + 1;

    let full_blocks = len / BLOCK_BUFFER_SIZE;
    let rest = len % BLOCK_BUFFER_SIZE;
    let mut overhead = full_blocks * block_overhead(BLOCK_BUFFER_SIZE);
    if rest > 0 || len == 0 {
        overhead += block_overhead(rest);
    }
    len + overhead + MAX_FRAMING_BYTES + BE16_PAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::{compress, CompressOptions};
    use orobas_core::{CompressionMode, Framing};

    #[test]
    fn test_limit() {
        assert_eq!(safe_compressed_size(4_294_967_261), 4_294_967_261 + 65_535 * 11 + 6 + 19);
        assert_eq!(safe_compressed_size(4_294_967_262), 0);
    }

    #[test]
    fn test_small_sizes() {
        assert_eq!(safe_compressed_size(0), 5 + 1 + 19);
        assert_eq!(safe_compressed_size(100), 100 + 6 + 19);
        assert_eq!(safe_compressed_size(BLOCK_BUFFER_SIZE), BLOCK_BUFFER_SIZE + 11 + 19);
    }

    #[test]
    fn test_bound_holds_for_random_data() {
        let mut seed = 0x9E37_79B9_7F4A_7C15u64;
        let input: Vec<u8> = (0..300_000)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                seed as u8
            })
            .collect();
        for mode in [CompressionMode::Dynamic, CompressionMode::Fixed, CompressionMode::Stored] {
            let out = compress(&input, CompressOptions::new(mode, Framing::Gzip)).unwrap();
            assert!(out.len() <= safe_compressed_size(input.len()), "{mode:?}");
        }
    }
}
