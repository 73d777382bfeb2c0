//! Resumable DEFLATE compressor.
//!
//! [`CompressState`] holds everything needed to continue a stream: the
//! current [`CompressPhase`], the history window, the open block, the bit
//! accumulator and a buffer of encoded bytes not yet handed to the caller.
//! [`CompressState::step`] runs the phase machine until the operation is
//! finished or one of the caller's buffers runs out, and reports which one.
//!
//! A block is closed only when the 64 KiB block buffer is full and more
//! input follows, or on the last call. Block boundaries therefore depend on
//! the input stream alone and not on how it was split into calls, so every
//! backend running this engine emits the same bytes.

use std::sync::Arc;

use orobas_core::{
    Adler32, BitBuffer, ByteSink, ByteSource, CompressionLevel, CompressionMode, Crc32, Error,
    Framing, JobFlags, OperationResult, Result, Status, XorChecksum,
};

use crate::container;
use crate::huffman::{
    build_code_lengths, distance_code, length_code, HuffmanEncoder, CL_CODE_ORDER, CL_SYMBOLS,
    DISTANCE_BASE, DISTANCE_EXTRA_BITS, END_OF_BLOCK, LENGTH_BASE, LENGTH_EXTRA_BITS, MAX_CL_BITS,
};
use crate::lz77::{parse_block, Token, MAX_DISTANCE};
use crate::stored::{append_stored_blocks, stored_size_needed};
use crate::table::{complete_degenerate, Histogram, HuffmanTable};

/// Size of the block buffer; a block is closed once it holds this much.
pub const BLOCK_BUFFER_SIZE: usize = 64 * 1024;

/// Block type field values.
const BTYPE_FIXED: u32 = 1;
const BTYPE_DYNAMIC: u32 = 2;

/// Position of the compressor in its phase machine.
///
/// Phases only move forward, except the return to
/// [`PreprocessNewBlock`](CompressPhase::PreprocessNewBlock) after a
/// non-final block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CompressPhase {
    /// Nothing emitted yet; the container header is pending.
    #[default]
    Init,
    /// Slide the history window and open an empty block.
    PreprocessNewBlock,
    /// Fix the block's size limit.
    StartNewBlock,
    /// Fill the open block from the caller's input.
    CompressionBody,
    /// Input is complete; the open block becomes the final one.
    CompressRestData,
    /// Tokenize the block, choose the table and the block encoding.
    CreateIcfHeader,
    /// Emit the block header (and dynamic table) bits.
    WriteBufferedIcfHeader,
    /// Emit the coded tokens and the end-of-block code.
    FlushIcfBuffer,
    /// Byte-align the bit stream for a stored block.
    WriteStoredBlockHeader,
    /// Emit the block as stored blocks.
    WriteStoredBlock,
    /// Decide whether another block follows.
    FinishDeflateBlock,
    /// Pad the last partial byte of the bit stream.
    FlushBitBuffer,
    /// Emit the container trailer.
    FlushWriteBuffer,
    /// Everything has been emitted.
    FinishCompressionProcess,
}

/// Options fixed for the lifetime of a stream.
#[derive(Debug, Clone, Default)]
pub struct CompressOptions {
    pub level: CompressionLevel,
    pub mode: CompressionMode,
    pub framing: Framing,
    /// Caller table for static and canned modes.
    pub table: Option<Arc<HuffmanTable>>,
}

impl CompressOptions {
    pub fn new(mode: CompressionMode, framing: Framing) -> Self {
        Self {
            mode,
            framing,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_table(mut self, table: Arc<HuffmanTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Options described by a job's flag bitmask.
    pub fn from_flags(
        flags: JobFlags,
        level: CompressionLevel,
        table: Option<Arc<HuffmanTable>>,
    ) -> Result<Self> {
        let mode = CompressionMode::from_flags(flags, table.is_some())?;
        let options = Self {
            level,
            mode,
            framing: Framing::from_flags(flags)?,
            table,
        };
        options.validate()?;
        Ok(options)
    }

    /// Reject combinations the engine cannot encode.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            CompressionMode::Static | CompressionMode::Canned if self.table.is_none() => Err(
                Error::config(format!("{:?} mode requires a huffman table", self.mode)),
            ),
            CompressionMode::Canned if self.framing != Framing::Raw => {
                Err(Error::config("canned mode streams carry no container framing"))
            }
            _ => Ok(()),
        }
    }
}

/// How the open block will be written.
#[derive(Debug, Clone)]
struct BlockPlan {
    stored: bool,
    /// Block header bits as `(value, bit_count)` pairs, BTYPE included.
    header: Vec<(u32, u32)>,
    lit: Option<HuffmanEncoder>,
    dist: Option<HuffmanEncoder>,
}

/// Externalized compressor state.
#[derive(Debug, Clone)]
pub struct CompressState {
    options: CompressOptions,
    phase: CompressPhase,

    /// History followed by the open block.
    window: Vec<u8>,
    block_start: usize,
    block_limit: usize,
    final_block: bool,
    plan: Option<BlockPlan>,
    tokens: Vec<Token>,
    histogram: Histogram,

    bits: BitBuffer,
    pending: Vec<u8>,
    pending_pos: usize,
    last_bit_offset: u8,

    crc: Crc32,
    xor: XorChecksum,
    adler: Adler32,
    total_in: u64,
    total_out: u64,
    blocks: u64,
}

impl CompressState {
    pub fn new(options: CompressOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            phase: CompressPhase::Init,
            window: Vec::new(),
            block_start: 0,
            block_limit: BLOCK_BUFFER_SIZE,
            final_block: false,
            plan: None,
            tokens: Vec::new(),
            histogram: Histogram::new(),
            bits: BitBuffer::new(),
            pending: Vec::new(),
            pending_pos: 0,
            last_bit_offset: 0,
            crc: Crc32::new(),
            xor: XorChecksum::new(),
            adler: Adler32::new(),
            total_in: 0,
            total_out: 0,
            blocks: 0,
        })
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    pub fn phase(&self) -> CompressPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == CompressPhase::FinishCompressionProcess && self.pending_len() == 0
    }

    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    pub fn xor_checksum(&self) -> u16 {
        self.xor.value()
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Whether `len` more input bytes can be taken into the open block
    /// without producing any output.
    pub fn can_absorb(&self, len: usize) -> bool {
        self.phase == CompressPhase::CompressionBody
            && self.pending_len() == 0
            && len <= self.block_limit - self.open_block_len()
    }

    /// Take input into the open block without running the phase machine.
    ///
    /// This is the effect of a non-final call that only accumulates input.
    pub fn absorb(&mut self, data: &[u8]) -> Result<()> {
        if !self.can_absorb(data.len()) {
            return Err(Error::InvalidState {
                expected: "open block with room for the input",
                actual: "block full or output pending",
            });
        }
        self.take_input(data);
        Ok(())
    }

    /// Run the compressor over `src` into `dst`.
    ///
    /// `last` marks the call that ends the stream. Cursors are advanced by
    /// exactly the bytes consumed and produced.
    pub fn step(
        &mut self,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
        last: bool,
    ) -> Result<OperationResult> {
        let in_start = src.position();
        let out_start = dst.position();

        if self.options.mode == CompressionMode::Canned && !last {
            return Err(Error::config("canned mode requires a single-shot job"));
        }

        let status = self.run(src, dst, last)?;

        let produced = dst.position() - out_start;
        self.total_out += produced as u64;
        Ok(OperationResult {
            status,
            consumed: src.position() - in_start,
            produced,
            last_bit_offset: if status == Status::Done {
                self.last_bit_offset
            } else {
                0
            },
            crc32: self.crc.value(),
            xor_checksum: self.xor.value(),
            ..OperationResult::default()
        })
    }

    fn run(&mut self, src: &mut ByteSource<'_>, dst: &mut ByteSink<'_>, last: bool) -> Result<Status> {
        loop {
            if !self.drain_pending(dst) {
                return Ok(Status::MoreOutputNeeded);
            }

            match self.phase {
                CompressPhase::Init => {
                    container::write_header(
                        self.options.framing,
                        self.options.level,
                        &mut self.pending,
                    );
                    self.transition(CompressPhase::PreprocessNewBlock);
                }
                CompressPhase::PreprocessNewBlock => {
                    if self.window.len() > MAX_DISTANCE {
                        let excess = self.window.len() - MAX_DISTANCE;
                        self.window.drain(..excess);
                    }
                    self.block_start = self.window.len();
                    self.tokens.clear();
                    self.histogram = Histogram::new();
                    self.plan = None;
                    self.transition(CompressPhase::StartNewBlock);
                }
                CompressPhase::StartNewBlock => {
                    self.block_limit = match self.options.mode {
                        CompressionMode::Canned => usize::MAX,
                        _ => BLOCK_BUFFER_SIZE,
                    };
                    self.transition(CompressPhase::CompressionBody);
                }
                CompressPhase::CompressionBody => {
                    let room = self.block_limit - self.open_block_len();
                    let chunk = src.take(room);
                    self.take_input(chunk);

                    if !src.is_empty() {
                        self.final_block = false;
                        self.transition(CompressPhase::CreateIcfHeader);
                    } else if last {
                        self.transition(CompressPhase::CompressRestData);
                    } else {
                        return Ok(Status::MoreInputNeeded);
                    }
                }
                CompressPhase::CompressRestData => {
                    self.final_block = true;
                    self.transition(CompressPhase::CreateIcfHeader);
                }
                CompressPhase::CreateIcfHeader => {
                    let plan = self.plan_block()?;
                    let next = if plan.stored {
                        CompressPhase::WriteStoredBlockHeader
                    } else {
                        CompressPhase::WriteBufferedIcfHeader
                    };
                    self.plan = Some(plan);
                    self.transition(next);
                }
                CompressPhase::WriteBufferedIcfHeader => {
                    if let Some(plan) = &self.plan {
                        for &(value, count) in &plan.header {
                            self.bits.put(value, count, &mut self.pending);
                        }
                    }
                    self.transition(CompressPhase::FlushIcfBuffer);
                }
                CompressPhase::FlushIcfBuffer => {
                    self.emit_tokens()?;
                    self.bits.drain_bytes(&mut self.pending);
                    self.transition(CompressPhase::FinishDeflateBlock);
                }
                CompressPhase::WriteStoredBlockHeader => {
                    self.bits.drain_bytes(&mut self.pending);
                    self.transition(CompressPhase::WriteStoredBlock);
                }
                CompressPhase::WriteStoredBlock => {
                    let partial = self.bits.partial_byte();
                    self.bits.clear();
                    append_stored_blocks(
                        &mut self.pending,
                        &self.window[self.block_start..],
                        partial,
                        self.final_block,
                    );
                    self.transition(CompressPhase::FinishDeflateBlock);
                }
                CompressPhase::FinishDeflateBlock => {
                    self.blocks += 1;
                    tracing::trace!(
                        block = self.blocks,
                        len = self.open_block_len(),
                        stored = self.plan.as_ref().is_some_and(|p| p.stored),
                        final_block = self.final_block,
                        "deflate block closed"
                    );
                    if self.final_block {
                        self.transition(CompressPhase::FlushBitBuffer);
                    } else {
                        self.transition(CompressPhase::PreprocessNewBlock);
                    }
                }
                CompressPhase::FlushBitBuffer => {
                    self.last_bit_offset = self.bits.flush_padded(&mut self.pending);
                    self.transition(CompressPhase::FlushWriteBuffer);
                }
                CompressPhase::FlushWriteBuffer => {
                    if self.options.framing != Framing::Raw {
                        self.last_bit_offset = 0;
                    }
                    container::write_trailer(
                        self.options.framing,
                        self.crc.value(),
                        self.adler.value(),
                        self.total_in,
                        &mut self.pending,
                    );
                    self.transition(CompressPhase::FinishCompressionProcess);
                }
                CompressPhase::FinishCompressionProcess => return Ok(Status::Done),
            }
        }
    }

    fn transition(&mut self, next: CompressPhase) {
        debug_assert!(
            next > self.phase || next == CompressPhase::PreprocessNewBlock,
            "backward phase transition {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    #[inline]
    fn open_block_len(&self) -> usize {
        self.window.len().saturating_sub(self.block_start)
    }

    #[inline]
    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    fn take_input(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.crc.update(data);
        self.xor.update(data);
        self.adler.update(data);
        self.total_in += data.len() as u64;
        self.window.extend_from_slice(data);
    }

    /// Copy pending bytes to the sink; true once nothing is left.
    fn drain_pending(&mut self, dst: &mut ByteSink<'_>) -> bool {
        if self.pending_len() > 0 {
            self.pending_pos += dst.write_partial(&self.pending[self.pending_pos..]);
        }
        if self.pending_len() > 0 {
            return false;
        }
        self.pending.clear();
        self.pending_pos = 0;
        true
    }

    /// Tokenize the open block and pick its encoding.
    fn plan_block(&mut self) -> Result<BlockPlan> {
        let bfinal = u32::from(self.final_block);
        let mode = self.options.mode;
        let block_len = self.open_block_len();

        let stored_plan = BlockPlan {
            stored: true,
            header: Vec::new(),
            lit: None,
            dist: None,
        };
        if mode == CompressionMode::Stored {
            return Ok(stored_plan);
        }

        parse_block(
            &self.window,
            self.block_start,
            self.options.level,
            &mut self.tokens,
            &mut self.histogram,
        );
        self.histogram.record_end_of_block();

        let owned;
        let (table, btype): (&HuffmanTable, Option<u32>) = match mode {
            CompressionMode::Dynamic => {
                owned = HuffmanTable::from_histogram(&self.histogram);
                (&owned, Some(BTYPE_DYNAMIC))
            }
            CompressionMode::Static | CompressionMode::Canned => {
                let table = self
                    .options
                    .table
                    .as_deref()
                    .ok_or_else(|| Error::config("huffman table missing"))?;
                let btype = (mode == CompressionMode::Static).then_some(if table.is_fixed() {
                    BTYPE_FIXED
                } else {
                    BTYPE_DYNAMIC
                });
                (table, btype)
            }
            _ => {
                owned = HuffmanTable::fixed();
                (&owned, Some(BTYPE_FIXED))
            }
        };

        let mut header = Vec::new();
        if let Some(btype) = btype {
            header.push((bfinal | (btype << 1), 3));
            if btype == BTYPE_DYNAMIC {
                dynamic_header(table, &mut header);
            }
        }

        let Some(body_bits) = table.encoded_bits(&self.histogram) else {
            if mode == CompressionMode::Canned {
                return Err(Error::config("canned table has no code for a used symbol"));
            }
            return Ok(stored_plan);
        };

        if mode != CompressionMode::Canned {
            self.bits.drain_bytes(&mut self.pending);
            let offset = self.bits.count() as u8;
            let stored_bits = (stored_size_needed(block_len, offset) * 8) as u64 - offset as u64;
            let header_bits: u64 = header.iter().map(|&(_, n)| n as u64).sum();
            if header_bits + body_bits >= stored_bits {
                return Ok(stored_plan);
            }
        }

        let (lit, dist) = table.encoders();
        Ok(BlockPlan {
            stored: false,
            header,
            lit: Some(lit),
            dist: Some(dist),
        })
    }

    fn emit_tokens(&mut self) -> Result<()> {
        let Some(BlockPlan {
            lit: Some(lit),
            dist: Some(dist),
            ..
        }) = &self.plan
        else {
            return Err(Error::InvalidState {
                expected: "huffman block plan",
                actual: "no encoders",
            });
        };

        for token in &self.tokens {
            match *token {
                Token::Literal(byte) => {
                    let (code, len) = lit.get(byte as usize);
                    self.bits.put(code, len, &mut self.pending);
                }
                Token::Match { length, distance } => {
                    let (length, distance) = (length as usize, distance as usize);
                    let lc = length_code(length);
                    let (code, len) = lit.get(257 + lc);
                    self.bits.put(code, len, &mut self.pending);
                    self.bits.put(
                        (length - LENGTH_BASE[lc] as usize) as u32,
                        LENGTH_EXTRA_BITS[lc] as u32,
                        &mut self.pending,
                    );

                    let dc = distance_code(distance);
                    let (code, len) = dist.get(dc);
                    self.bits.put(code, len, &mut self.pending);
                    self.bits.put(
                        (distance - DISTANCE_BASE[dc] as usize) as u32,
                        DISTANCE_EXTRA_BITS[dc] as u32,
                        &mut self.pending,
                    );
                }
            }
        }

        let (code, len) = lit.get(END_OF_BLOCK);
        self.bits.put(code, len, &mut self.pending);
        Ok(())
    }
}

/// Append the dynamic block header for `table`: HLIT, HDIST, HCLEN, the
/// code length code and the run-length coded code lengths.
fn dynamic_header(table: &HuffmanTable, out: &mut Vec<(u32, u32)>) {
    let lit = table.lit_len_lengths();
    let dist = table.dist_lengths();
    let hlit = lit.iter().rposition(|&l| l > 0).map_or(0, |i| i + 1).max(257);
    let hdist = dist.iter().rposition(|&l| l > 0).map_or(0, |i| i + 1).max(1);

    let lengths: Vec<u8> = lit[..hlit].iter().chain(&dist[..hdist]).copied().collect();
    let runs = run_length_encode(&lengths);

    let mut cl_freq = [0u32; CL_SYMBOLS];
    for &(symbol, _) in &runs {
        cl_freq[symbol as usize] += 1;
    }
    let mut cl_lengths = build_code_lengths(&cl_freq, MAX_CL_BITS as u8);
    complete_degenerate(&mut cl_lengths);
    let cl_encoder = HuffmanEncoder::from_lengths(&cl_lengths);

    let hclen = CL_CODE_ORDER
        .iter()
        .rposition(|&symbol| cl_lengths[symbol] > 0)
        .map_or(0, |i| i + 1)
        .max(4);

    out.push(((hlit - 257) as u32, 5));
    out.push(((hdist - 1) as u32, 5));
    out.push(((hclen - 4) as u32, 4));
    for &symbol in &CL_CODE_ORDER[..hclen] {
        out.push((cl_lengths[symbol] as u32, 3));
    }

    for (symbol, extra) in runs {
        let (code, len) = cl_encoder.get(symbol as usize);
        out.push((code, len));
        match symbol {
            16 => out.push((extra as u32, 2)),
            17 => out.push((extra as u32, 3)),
            18 => out.push((extra as u32, 7)),
            _ => {}
        }
    }
}

/// Code length sequence as `(symbol, extra)` pairs using the repeat codes
/// 16 (previous length), 17 (short zero run) and 18 (long zero run).
fn run_length_encode(lengths: &[u8]) -> Vec<(u8, u8)> {
    let mut runs = Vec::new();
    let mut i = 0;

    while i < lengths.len() {
        let value = lengths[i];
        let mut run = lengths[i..].iter().take_while(|&&l| l == value).count();
        i += run;

        if value == 0 {
            while run >= 11 {
                let take = run.min(138);
                runs.push((18, (take - 11) as u8));
                run -= take;
            }
            if run >= 3 {
                runs.push((17, (run - 3) as u8));
                run = 0;
            }
        } else {
            runs.push((value, 0));
            run -= 1;
            while run >= 3 {
                let take = run.min(6);
                runs.push((16, (take - 3) as u8));
                run -= take;
            }
        }

        runs.extend(std::iter::repeat((value, 0)).take(run));
    }
    runs
}

/// Compress `input` in one call into a new buffer.
pub fn compress(input: &[u8], options: CompressOptions) -> Result<Vec<u8>> {
    let mut state = CompressState::new(options)?;
    let mut src = ByteSource::new(input);
    let mut output = Vec::new();
    let mut chunk = vec![0u8; BLOCK_BUFFER_SIZE];

    loop {
        let mut dst = ByteSink::new(&mut chunk);
        let result = state.step(&mut src, &mut dst, true)?;
        output.extend_from_slice(&chunk[..result.produced]);
        match result.status {
            Status::Done => return Ok(output),
            Status::MoreOutputNeeded => continue,
            Status::MoreInputNeeded => {
                return Err(Error::InvalidState {
                    expected: "done or more output",
                    actual: "more input on a last call",
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflate::{inflate, inflate_with, InflateOptions};

    fn sample(len: usize) -> Vec<u8> {
        let words = ["orobas ", "deflate ", "block ", "stream ", "huffman ", "window "];
        let mut out = Vec::with_capacity(len);
        let mut i = 0usize;
        while out.len() < len {
            out.extend_from_slice(words[(i * 7 + i / 3) % words.len()].as_bytes());
            i += 1;
        }
        out.truncate(len);
        out
    }

    fn all_modes() -> Vec<CompressionMode> {
        vec![
            CompressionMode::Fixed,
            CompressionMode::Dynamic,
            CompressionMode::Stored,
        ]
    }

    #[test]
    fn test_roundtrip_modes_and_levels() {
        let input = sample(200_000);
        for mode in all_modes() {
            for level in [CompressionLevel::Default, CompressionLevel::High] {
                let options = CompressOptions::new(mode, Framing::Raw).with_level(level);
                let compressed = compress(&input, options).unwrap();
                let mut decoded = Vec::new();
                inflate(&compressed, &mut decoded).unwrap();
                assert_eq!(decoded, input, "mode {mode:?} level {level:?}");
            }
        }
    }

    #[test]
    fn test_empty_input() {
        for mode in all_modes() {
            let compressed = compress(&[], CompressOptions::new(mode, Framing::Raw)).unwrap();
            let mut decoded = Vec::new();
            inflate(&compressed, &mut decoded).unwrap();
            assert!(decoded.is_empty());
        }
    }

    #[test]
    fn test_incompressible_falls_back_to_stored() {
        let mut seed = 0x2545_F491_4F6C_DD1Du64;
        let input: Vec<u8> = (0..4096)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed >> 32) as u8
            })
            .collect();
        let compressed = compress(&input, CompressOptions::default()).unwrap();
        assert!(compressed.len() <= stored_size_needed(input.len(), 0));
        // BFINAL=1, BTYPE=00
        assert_eq!(compressed[0] & 0b111, 0b001);
    }

    #[test]
    fn test_resumed_calls_match_single_shot() {
        let input = sample(150_000);
        let single = compress(&input, CompressOptions::default()).unwrap();

        let mut state = CompressState::new(CompressOptions::default()).unwrap();
        let mut output = Vec::new();
        let mut buf = vec![0u8; 333];
        let pieces: Vec<&[u8]> = input.chunks(7_777).collect();
        for (i, piece) in pieces.iter().enumerate() {
            let last = i + 1 == pieces.len();
            let mut src = ByteSource::new(piece);
            loop {
                let mut dst = ByteSink::new(&mut buf);
                let result = state.step(&mut src, &mut dst, last).unwrap();
                output.extend_from_slice(&buf[..result.produced]);
                match result.status {
                    Status::MoreOutputNeeded => continue,
                    Status::MoreInputNeeded => {
                        assert!(src.is_empty());
                        break;
                    }
                    Status::Done => break,
                }
            }
        }
        assert!(state.is_done());
        assert_eq!(output, single);
        assert_eq!(state.crc32(), orobas_core::crc32(&input));
    }

    #[test]
    fn test_absorb_matches_step() {
        let input = sample(10_000);
        let mut stepped = CompressState::new(CompressOptions::default()).unwrap();
        let mut absorbed = stepped.clone();
        let mut buf = vec![0u8; 64];

        let mut src = ByteSource::new(&input[..100]);
        let mut dst = ByteSink::new(&mut buf);
        stepped.step(&mut src, &mut dst, false).unwrap();
        let mut src = ByteSource::new(&input[..100]);
        let mut dst = ByteSink::new(&mut buf);
        absorbed.step(&mut src, &mut dst, false).unwrap();

        assert!(absorbed.can_absorb(5_000));
        absorbed.absorb(&input[100..5_100]).unwrap();
        let mut src = ByteSource::new(&input[100..5_100]);
        let mut dst = ByteSink::new(&mut buf);
        let result = stepped.step(&mut src, &mut dst, false).unwrap();
        assert_eq!(result.status, Status::MoreInputNeeded);
        assert_eq!(result.produced, 0);
        assert_eq!(absorbed.crc32(), stepped.crc32());
        assert_eq!(absorbed.total_in(), stepped.total_in());
        assert!(!absorbed.can_absorb(BLOCK_BUFFER_SIZE));
    }

    #[test]
    fn test_framing_roundtrip() {
        let input = sample(5_000);
        for framing in [Framing::Gzip, Framing::Zlib] {
            let compressed = compress(&input, CompressOptions::new(CompressionMode::Dynamic, framing))
                .unwrap();
            let decoded = inflate_with(&compressed, InflateOptions::new(framing)).unwrap();
            assert_eq!(decoded, input);
        }
    }

    #[test]
    fn test_static_and_canned_tables() {
        let input = sample(3_000);
        let mut histogram = Histogram::from_literals(&input);
        histogram.fill_missing();
        let table = Arc::new(HuffmanTable::from_histogram(&histogram));

        let options = CompressOptions::new(CompressionMode::Static, Framing::Raw)
            .with_table(table.clone());
        let compressed = compress(&input, options).unwrap();
        let mut decoded = Vec::new();
        inflate(&compressed, &mut decoded).unwrap();
        assert_eq!(decoded, input);

        let options = CompressOptions::new(CompressionMode::Canned, Framing::Raw)
            .with_table(table.clone());
        let compressed = compress(&input, options).unwrap();
        let decoded =
            inflate_with(&compressed, InflateOptions::new(Framing::Raw).with_canned(table)).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_canned_rejects_streaming_and_missing_symbols() {
        let table = Arc::new(HuffmanTable::from_histogram(&Histogram::from_literals(b"ab")));
        let options = CompressOptions::new(CompressionMode::Canned, Framing::Raw).with_table(table);
        assert!(matches!(
            compress(b"xyz", options.clone()),
            Err(Error::InvalidConfiguration(_))
        ));

        let mut state = CompressState::new(options).unwrap();
        let mut buf = [0u8; 16];
        let mut src = ByteSource::new(b"ab");
        let mut dst = ByteSink::new(&mut buf);
        assert!(state.step(&mut src, &mut dst, false).is_err());
    }

    #[test]
    fn test_options_validation() {
        assert!(CompressState::new(CompressOptions::new(CompressionMode::Static, Framing::Raw)).is_err());
        let table = Arc::new(HuffmanTable::fixed());
        let canned_gzip = CompressOptions::new(CompressionMode::Canned, Framing::Gzip).with_table(table);
        assert!(canned_gzip.validate().is_err());
        assert!(CompressOptions::from_flags(
            JobFlags::STORED | JobFlags::DYNAMIC_HUFFMAN,
            CompressionLevel::Default,
            None
        )
        .is_err());
    }

    #[test]
    fn test_run_length_encode() {
        let mut lengths = vec![8u8; 10];
        lengths.extend(vec![0u8; 150]);
        lengths.extend([5, 0, 0]);
        let runs = run_length_encode(&lengths);
        assert_eq!(
            runs,
            vec![
                (8, 0),
                (16, 3),
                (16, 0),
                (18, 127),
                (18, 1),
                (5, 0),
                (0, 0),
                (0, 0)
            ]
        );
    }
}
