//! Chunk planning and output-size estimation.

use std::ops::Range;

use orobas_deflate::safe_compressed_size;

/// Split of a source into chunks: all chunks but the last have
/// `chunk_size` bytes, the last one takes the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub source_len: usize,
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub last_chunk_size: usize,
}

impl ChunkPlan {
    /// Split into `chunk_count` chunks, with chunks clamped to
    /// `max_transfer` bytes.
    pub fn by_count(source_len: usize, chunk_count: usize, max_transfer: Option<usize>) -> Self {
        let count = chunk_count.max(1);
        let chunk_size = (source_len / count).max(1);
        Self::by_size(source_len, chunk_size, max_transfer)
    }

    /// Split into chunks of `chunk_size` bytes, clamped to `max_transfer`.
    ///
    /// The remainder joins the last chunk while that stays within
    /// `max_transfer`, and becomes a chunk of its own otherwise.
    pub fn by_size(source_len: usize, chunk_size: usize, max_transfer: Option<usize>) -> Self {
        if source_len == 0 {
            return Self {
                source_len,
                chunk_size: 0,
                chunk_count: 1,
                last_chunk_size: 0,
            };
        }
        let limit = max_transfer.unwrap_or(usize::MAX).max(1);
        let chunk_size = chunk_size.clamp(1, limit).min(source_len);

        let mut chunk_count = source_len / chunk_size;
        let rest = source_len % chunk_size;
        let last_chunk_size = if rest == 0 {
            chunk_size
        } else if chunk_size + rest <= limit {
            chunk_size + rest
        } else {
            chunk_count += 1;
            rest
        };
        Self {
            source_len,
            chunk_size,
            chunk_count,
            last_chunk_size,
        }
    }

    pub fn chunk_len(&self, index: usize) -> usize {
        if index + 1 == self.chunk_count {
            self.last_chunk_size
        } else {
            self.chunk_size
        }
    }

    pub fn range(&self, index: usize) -> Range<usize> {
        let start = index * self.chunk_size;
        start..start + self.chunk_len(index)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.chunk_count).map(move |i| self.range(i))
    }

    /// Worst-case compressed size of each chunk, or `None` if a chunk is too
    /// large to bound.
    pub fn safe_sizes(&self) -> Option<Vec<usize>> {
        (0..self.chunk_count)
            .map(|i| match safe_compressed_size(self.chunk_len(i)) {
                0 => None,
                size => Some(size),
            })
            .collect()
    }

    /// Sum of [`ChunkPlan::safe_sizes`], or 0.
    pub fn estimate(&self) -> usize {
        self.safe_sizes().map_or(0, |sizes| sizes.iter().sum())
    }
}

/// Output buffer size for compressing `source_len` bytes in `chunk_count`
/// chunks, or 0 when a chunk exceeds the single-shot limit.
pub fn estimate_compressed_size(source_len: usize, chunk_count: usize) -> usize {
    ChunkPlan::by_count(source_len, chunk_count, None).estimate()
}
