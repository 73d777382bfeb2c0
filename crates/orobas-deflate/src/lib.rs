//! # Orobas Deflate
//!
//! The software backend: a DEFLATE compressor and decompressor whose whole
//! state lives in plain structs, so a stream can be suspended whenever the
//! caller's input or output runs out and resumed later with new buffers.
//!
//! ## Formats
//!
//! - **Raw**: DEFLATE (RFC 1951)
//! - **Zlib**: DEFLATE with zlib wrapper (RFC 1950)
//! - **Gzip**: DEFLATE with gzip wrapper (RFC 1952)
//! - **BE16**: any of the above, word-reversed for big-endian consumers
//!
//! ## Example
//!
//! ```
//! use orobas_core::{CompressionMode, Framing};
//! use orobas_deflate::{compress, inflate_with, CompressOptions, InflateOptions};
//!
//! let data = b"suspend, resume, suspend, resume".repeat(10);
//! let stream = compress(&data, CompressOptions::new(CompressionMode::Dynamic, Framing::Gzip))?;
//! let back = inflate_with(&stream, InflateOptions::new(Framing::Gzip))?;
//! assert_eq!(back, data);
//! # Ok::<(), orobas_core::Error>(())
//! ```

pub mod be16;
pub mod compress;
pub mod container;
pub mod estimate;
pub mod huffman;
pub mod inflate;
pub mod lz77;
pub mod stored;
pub mod table;
pub mod verify;

pub use be16::{be16_adjust, from_be16, to_be16};
pub use compress::{compress, CompressOptions, CompressPhase, CompressState, BLOCK_BUFFER_SIZE};
pub use estimate::{safe_compressed_size, MAX_SAFE_INPUT};
pub use inflate::{inflate, inflate_with, InflateOptions, InflateState};
pub use stored::{stored_size_needed, write_stored_blocks};
pub use table::{DecompressionTable, FlatTable, Histogram, HuffmanTable};
pub use verify::{is_verification_enabled, verify_stream, Verifier};
