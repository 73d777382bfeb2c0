//! LZ77 match finding over a sliding history window.

use orobas_core::CompressionLevel;

use crate::table::Histogram;

/// Minimum match length.
pub const MIN_MATCH: usize = 3;

/// Maximum match length.
pub const MAX_MATCH: usize = 258;

/// Maximum look-back distance.
pub const MAX_DISTANCE: usize = 32768;

/// Hash table size (power of 2).
const HASH_SIZE: usize = 1 << 15;

/// Intermediate compressed form of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Literal(u8),
    Match { length: u16, distance: u16 },
}

#[derive(Debug, Clone, Copy)]
struct SearchParams {
    max_chain: usize,
    lazy: bool,
    nice_length: usize,
}

impl SearchParams {
    fn for_level(level: CompressionLevel) -> Self {
        match level {
            CompressionLevel::Default => SearchParams {
                max_chain: 8,
                lazy: false,
                nice_length: 32,
            },
            CompressionLevel::High => SearchParams {
                max_chain: 128,
                lazy: true,
                nice_length: MAX_MATCH,
            },
        }
    }
}

/// Compute hash of 3 bytes at position.
#[inline]
fn hash3(data: &[u8], pos: usize) -> usize {
    let b0 = data[pos] as usize;
    let b1 = data[pos + 1] as usize;
    let b2 = data[pos + 2] as usize;
    ((b0 << 10) ^ (b1 << 5) ^ b2) & (HASH_SIZE - 1)
}

/// Hash chains over one window; positions are stored plus one so that
/// zero means "empty".
struct Chains {
    head: Vec<u32>,
    prev: Vec<u32>,
}

impl Chains {
    fn new(window_len: usize) -> Self {
        Self {
            head: vec![0; HASH_SIZE],
            prev: vec![0; window_len],
        }
    }

    #[inline]
    fn insert(&mut self, window: &[u8], pos: usize) {
        if pos + MIN_MATCH > window.len() {
            return;
        }
        let hash = hash3(window, pos);
        self.prev[pos] = self.head[hash];
        self.head[hash] = pos as u32 + 1;
    }

    /// Longest match for `pos` not extending past `end`.
    fn longest(
        &self,
        window: &[u8],
        pos: usize,
        end: usize,
        params: SearchParams,
    ) -> Option<(usize, usize)> {
        if pos + MIN_MATCH > end {
            return None;
        }
        let max_len = (end - pos).min(MAX_MATCH);
        let mut candidate = self.head[hash3(window, pos)] as usize;
        let mut best: Option<(usize, usize)> = None;
        let mut chain = 0;

        while candidate > 0 && chain < params.max_chain {
            let cand = candidate - 1;
            if cand >= pos || pos - cand > MAX_DISTANCE {
                break;
            }

            let mut len = 0;
            while len < max_len && window[cand + len] == window[pos + len] {
                len += 1;
            }

            if len >= MIN_MATCH && best.map_or(true, |(best_len, _)| len > best_len) {
                best = Some((len, pos - cand));
                if len >= params.nice_length || len == max_len {
                    break;
                }
            }

            candidate = self.prev[cand] as usize;
            chain += 1;
        }
        best
    }
}

/// Tokenize `window[block_start..]`, using up to 32 KiB before
/// `block_start` as history. Tokens are appended and counted in `histogram`.
pub fn parse_block(
    window: &[u8],
    block_start: usize,
    level: CompressionLevel,
    tokens: &mut Vec<Token>,
    histogram: &mut Histogram,
) {
    let params = SearchParams::for_level(level);
    let end = window.len();
    let mut chains = Chains::new(end);

    for pos in block_start.saturating_sub(MAX_DISTANCE)..block_start {
        chains.insert(window, pos);
    }

    let mut pos = block_start;
    while pos < end {
        let found = chains.longest(window, pos, end, params);
        chains.insert(window, pos);

        let Some((mut length, mut distance)) = found else {
            tokens.push(Token::Literal(window[pos]));
            histogram.record_literal(window[pos]);
            pos += 1;
            continue;
        };

        if params.lazy && length < params.nice_length {
            if let Some((next_len, next_dist)) = chains.longest(window, pos + 1, end, params) {
                if next_len > length {
                    tokens.push(Token::Literal(window[pos]));
                    histogram.record_literal(window[pos]);
                    pos += 1;
                    chains.insert(window, pos);
                    length = next_len;
                    distance = next_dist;
                }
            }
        }

        tokens.push(Token::Match {
            length: length as u16,
            distance: distance as u16,
        });
        histogram.record_match(length, distance);

        for i in 1..length {
            chains.insert(window, pos + i);
        }
        pos += length;
    }
}

/// Expand tokens back into bytes; used by tests and the verifier.
pub fn expand_tokens(history: &[u8], tokens: &[Token]) -> Vec<u8> {
    let mut out = history.to_vec();
    for token in tokens {
        match *token {
            Token::Literal(b) => out.push(b),
            Token::Match { length, distance } => {
                let start = out.len() - distance as usize;
                for i in 0..length as usize {
                    let byte = out[start + i];
                    out.push(byte);
                }
            }
        }
    }
    out.split_off(history.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(window: &[u8], block_start: usize, level: CompressionLevel) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut histogram = Histogram::new();
        parse_block(window, block_start, level, &mut tokens, &mut histogram);
        assert_eq!(
            expand_tokens(&window[..block_start], &tokens),
            &window[block_start..]
        );
        tokens
    }

    #[test]
    fn test_repetitive_block_uses_matches() {
        let input = b"ABCABCABCABCABCABCABCABCABCABC";
        for level in [CompressionLevel::Default, CompressionLevel::High] {
            let tokens = roundtrip(input, 0, level);
            assert!(tokens.len() < input.len() / 2);
        }
    }

    #[test]
    fn test_history_is_referenced() {
        let mut window = b"hello world, ".repeat(4);
        let start = window.len();
        window.extend_from_slice(b"hello world, hello world");
        let tokens = roundtrip(&window, start, CompressionLevel::Default);
        assert!(matches!(tokens[0], Token::Match { .. }));
    }

    #[test]
    fn test_pseudo_random() {
        let input: Vec<u8> = (0..5000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        roundtrip(&input, 0, CompressionLevel::High);
        roundtrip(&input, 2500, CompressionLevel::Default);
    }

    #[test]
    fn test_match_does_not_cross_block_end() {
        let input = vec![7u8; 1000];
        let tokens = roundtrip(&input, 0, CompressionLevel::Default);
        let covered: usize = tokens
            .iter()
            .map(|t| match t {
                Token::Literal(_) => 1,
                Token::Match { length, .. } => *length as usize,
            })
            .sum();
        assert_eq!(covered, 1000);
    }
}
