//! Resumable DEFLATE decompressor.
//!
//! [`InflateState`] buffers the input it is given and decodes as far as the
//! output space allows. Every symbol and every block header is read from a
//! saved bit position, so when the input ends in the middle of one the
//! position is restored and the next call starts it again from scratch.
//! Decoded bytes go into a history window first; what does not fit the
//! caller's buffer stays there and is handed out by the next call.

use std::sync::Arc;

use orobas_core::bits::reverse_words16;
use orobas_core::{
    Adler32, ByteSink, ByteSource, Crc32, Error, Framing, OperationResult, Result, Status,
    XorChecksum,
};

use crate::container;
use crate::huffman::{
    BitReader, HuffmanDecoder, CL_CODE_ORDER, CL_SYMBOLS, DISTANCE_BASE, DISTANCE_EXTRA_BITS,
    DIST_SYMBOLS, END_OF_BLOCK, LENGTH_BASE, LENGTH_EXTRA_BITS, LIT_LEN_SYMBOLS,
};
use crate::lz77::{MAX_DISTANCE, MAX_MATCH};
use crate::table::{DecompressionTable, HuffmanTable};

/// Scratch size used by the one-shot helpers.
const SCRATCH_SIZE: usize = 64 * 1024;

/// How an inflate stream is framed and coded.
#[derive(Debug, Clone, Default)]
pub struct InflateOptions {
    pub framing: Framing,
    /// Table of a header-less canned stream.
    pub canned: Option<Arc<HuffmanTable>>,
    /// Input is in the 16-bit word reversed layout.
    pub big_endian: bool,
}

impl InflateOptions {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            ..Self::default()
        }
    }

    pub fn with_canned(mut self, table: Arc<HuffmanTable>) -> Self {
        self.canned = Some(table);
        self
    }

    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InflatePhase {
    Header,
    BlockHeader,
    StoredLength,
    StoredCopy { remaining: usize },
    Codes,
    Trailer,
    Done,
}

/// Externalized decompressor state.
#[derive(Debug, Clone)]
pub struct InflateState {
    options: InflateOptions,
    phase: InflatePhase,
    final_block: bool,
    tables: Option<Arc<DecompressionTable>>,
    fixed: Option<Arc<DecompressionTable>>,

    /// Unconsumed input, read from `bit_pos`.
    input: Vec<u8>,
    bit_pos: usize,
    carry: Option<u8>,

    /// Recent output; bytes from `flushed` on are not yet delivered.
    history: Vec<u8>,
    flushed: usize,

    crc: Crc32,
    xor: XorChecksum,
    adler: Adler32,
    total_in: u64,
    total_out: u64,
}

impl InflateState {
    pub fn new(options: InflateOptions) -> Result<Self> {
        if options.canned.is_some() && options.framing != Framing::Raw {
            return Err(Error::config("canned mode streams carry no container framing"));
        }
        Ok(Self {
            options,
            phase: InflatePhase::Header,
            final_block: false,
            tables: None,
            fixed: None,
            input: Vec::new(),
            bit_pos: 0,
            carry: None,
            history: Vec::new(),
            flushed: 0,
            crc: Crc32::new(),
            xor: XorChecksum::new(),
            adler: Adler32::new(),
            total_in: 0,
            total_out: 0,
        })
    }

    pub fn is_done(&self) -> bool {
        self.phase == InflatePhase::Done && self.unflushed() == 0
    }

    /// CRC32 of the output delivered so far.
    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Decode from `src` into `dst`. `last` marks the call after which no
    /// more input will arrive; a stream still incomplete then is an error.
    ///
    /// All offered input is taken into the internal buffer; once the stream
    /// ends, input past its end is given back to `src`.
    pub fn step(
        &mut self,
        src: &mut ByteSource<'_>,
        dst: &mut ByteSink<'_>,
        last: bool,
    ) -> Result<OperationResult> {
        let in_start = src.position();
        let out_start = dst.position();

        self.compact_input();
        let offered = src.take(src.available());
        self.feed(offered, last);

        let status = self.run(dst, last)?;

        if status == Status::Done && !self.options.big_endian {
            let unused = self.input.len().saturating_sub(self.bit_pos.div_ceil(8));
            let give_back = unused.min(offered.len());
            src.rewind_to(src.position() - give_back);
            self.input.truncate(self.input.len() - give_back);
        }

        let consumed = src.position() - in_start;
        self.total_in += consumed as u64;
        Ok(OperationResult {
            status,
            consumed,
            produced: dst.position() - out_start,
            crc32: self.crc.value(),
            xor_checksum: self.xor.value(),
            ..OperationResult::default()
        })
    }

    fn compact_input(&mut self) {
        let whole = self.bit_pos / 8;
        if whole > 0 {
            self.input.drain(..whole);
            self.bit_pos -= whole * 8;
        }
    }

    fn feed(&mut self, data: &[u8], last: bool) {
        if !self.options.big_endian {
            self.input.extend_from_slice(data);
            return;
        }
        let mut staged = Vec::with_capacity(data.len() + 1);
        staged.extend(self.carry.take());
        staged.extend_from_slice(data);
        if staged.len() % 2 == 1 && !last {
            self.carry = staged.pop();
        }
        reverse_words16(&mut staged);
        self.input.extend_from_slice(&staged);
    }

    #[inline]
    fn unflushed(&self) -> usize {
        self.history.len() - self.flushed
    }

    /// Deliver buffered output; true once everything is out.
    fn flush(&mut self, dst: &mut ByteSink<'_>) -> bool {
        let written = dst.write_partial(&self.history[self.flushed..]);
        if written > 0 {
            let out = &self.history[self.flushed..self.flushed + written];
            self.crc.update(out);
            self.xor.update(out);
            self.adler.update(out);
            self.flushed += written;
            self.total_out += written as u64;
        }

        // Keep one window of history behind the undelivered bytes.
        if self.flushed > 2 * MAX_DISTANCE {
            let drop = self.flushed - MAX_DISTANCE;
            self.history.drain(..drop);
            self.flushed -= drop;
        }
        self.unflushed() == 0
    }

    /// Outcome of running out of input at the current phase.
    fn starved(&mut self, dst: &mut ByteSink<'_>, last: bool) -> Result<Status> {
        if !self.flush(dst) {
            return Ok(Status::MoreOutputNeeded);
        }
        if last {
            return Err(Error::unexpected_eof(self.input.len()));
        }
        Ok(Status::MoreInputNeeded)
    }

    fn run(&mut self, dst: &mut ByteSink<'_>, last: bool) -> Result<Status> {
        loop {
            if !self.flush(dst) {
                return Ok(Status::MoreOutputNeeded);
            }
            // Decode at least one byte ahead so a full sink still lets
            // header-only progress such as the final end-of-block happen.
            let limit = self.history.len() + dst.available().max(1);

            match self.phase {
                InflatePhase::Done => return Ok(Status::Done),
                InflatePhase::Header => {
                    let data = &self.input[self.bit_pos / 8..];
                    match container::parse_header(self.options.framing, data)? {
                        None => return self.starved(dst, last),
                        Some(len) => self.bit_pos += len * 8,
                    }
                    if let Some(table) = &self.options.canned {
                        self.tables = Some(Arc::new(table.to_decompression_table()?));
                        self.final_block = true;
                        self.phase = InflatePhase::Codes;
                    } else {
                        self.phase = InflatePhase::BlockHeader;
                    }
                }
                InflatePhase::BlockHeader => {
                    let mut reader = BitReader::with_position(&self.input, self.bit_pos);
                    match read_block_header(&mut reader, &mut self.fixed) {
                        Ok((final_block, next, tables)) => {
                            self.bit_pos = reader.position();
                            self.final_block = final_block;
                            self.tables = tables;
                            self.phase = next;
                        }
                        Err(Error::UnexpectedEof { .. }) => return self.starved(dst, last),
                        Err(e) => return Err(e),
                    }
                }
                InflatePhase::StoredLength => {
                    let mut reader = BitReader::with_position(&self.input, self.bit_pos);
                    reader.align();
                    let (Ok(len), Ok(nlen)) = (reader.read_bits(16), reader.read_bits(16)) else {
                        return self.starved(dst, last);
                    };
                    if len != !nlen & 0xFFFF {
                        return Err(Error::corrupted_at(
                            "stored block length mismatch",
                            self.bit_pos / 8,
                        ));
                    }
                    self.bit_pos = reader.position();
                    self.phase = InflatePhase::StoredCopy {
                        remaining: len as usize,
                    };
                }
                InflatePhase::StoredCopy { remaining } => {
                    let start = self.bit_pos / 8;
                    let available = self.input.len() - start;
                    let room = limit - self.history.len();
                    let n = remaining.min(available).min(room);
                    self.history.extend_from_slice(&self.input[start..start + n]);
                    self.bit_pos += n * 8;

                    if n == remaining {
                        self.end_block();
                    } else {
                        self.phase = InflatePhase::StoredCopy {
                            remaining: remaining - n,
                        };
                        if n == available {
                            return self.starved(dst, last);
                        }
                    }
                }
                InflatePhase::Codes => {
                    let tables = self
                        .tables
                        .clone()
                        .ok_or_else(|| Error::corrupted("no huffman tables for block"))?;
                    let mut reader = BitReader::with_position(&self.input, self.bit_pos);
                    let result = decode_codes(&mut reader, &tables, &mut self.history, limit);
                    self.bit_pos = reader.position();
                    match result {
                        Ok(true) => self.end_block(),
                        Ok(false) => {}
                        Err(Error::UnexpectedEof { .. }) => return self.starved(dst, last),
                        Err(e) => return Err(e),
                    }
                }
                InflatePhase::Trailer => {
                    let start = self.bit_pos.div_ceil(8);
                    let len = self.options.framing.trailer_len();
                    if self.input.len() < start + len {
                        return self.starved(dst, last);
                    }
                    container::check_trailer(
                        self.options.framing,
                        &self.input[start..start + len],
                        self.crc.value(),
                        self.adler.value(),
                        self.total_out,
                    )?;
                    self.bit_pos = (start + len) * 8;
                    self.phase = InflatePhase::Done;
                }
            }
        }
    }

    fn end_block(&mut self) {
        self.tables = None;
        self.phase = if self.final_block {
            InflatePhase::Trailer
        } else {
            InflatePhase::BlockHeader
        };
    }
}

type BlockStart = (bool, InflatePhase, Option<Arc<DecompressionTable>>);

/// Read BFINAL, BTYPE and, for dynamic blocks, the code tables. Nothing is
/// consumed unless the whole header is available.
fn read_block_header(
    reader: &mut BitReader<'_>,
    fixed: &mut Option<Arc<DecompressionTable>>,
) -> Result<BlockStart> {
    let checkpoint = reader.position();
    let result = parse_block_header(reader, fixed);
    if result.is_err() {
        reader.set_position(checkpoint);
    }
    result
}

fn parse_block_header(
    reader: &mut BitReader<'_>,
    fixed: &mut Option<Arc<DecompressionTable>>,
) -> Result<BlockStart> {
    let final_block = reader.read_bits(1)? == 1;
    match reader.read_bits(2)? {
        0 => Ok((final_block, InflatePhase::StoredLength, None)),
        1 => {
            let table = match fixed {
                Some(table) => table.clone(),
                None => {
                    let table = Arc::new(HuffmanTable::fixed().to_decompression_table()?);
                    *fixed = Some(table.clone());
                    table
                }
            };
            Ok((final_block, InflatePhase::Codes, Some(table)))
        }
        2 => {
            let table = read_dynamic_tables(reader)?;
            Ok((final_block, InflatePhase::Codes, Some(Arc::new(table))))
        }
        _ => Err(Error::corrupted("invalid block type 3")),
    }
}

fn read_dynamic_tables(reader: &mut BitReader<'_>) -> Result<DecompressionTable> {
    let hlit = reader.read_bits(5)? as usize + 257;
    let hdist = reader.read_bits(5)? as usize + 1;
    let hclen = reader.read_bits(4)? as usize + 4;
    if hlit > LIT_LEN_SYMBOLS || hdist > DIST_SYMBOLS {
        return Err(Error::corrupted("too many length or distance symbols"));
    }

    let mut cl_lengths = [0u8; CL_SYMBOLS];
    for &symbol in &CL_CODE_ORDER[..hclen] {
        cl_lengths[symbol] = reader.read_bits(3)? as u8;
    }
    let cl_decoder = HuffmanDecoder::from_lengths(&cl_lengths)?;

    let total = hlit + hdist;
    let mut lengths = Vec::with_capacity(total);
    while lengths.len() < total {
        let symbol = cl_decoder.decode(reader)?;
        let (value, repeat) = match symbol {
            0..=15 => (symbol as u8, 1),
            16 => {
                let prev = *lengths
                    .last()
                    .ok_or_else(|| Error::corrupted("repeat code with no previous length"))?;
                (prev, 3 + reader.read_bits(2)? as usize)
            }
            17 => (0, 3 + reader.read_bits(3)? as usize),
            18 => (0, 11 + reader.read_bits(7)? as usize),
            _ => return Err(Error::corrupted("invalid code length symbol")),
        };
        if lengths.len() + repeat > total {
            return Err(Error::corrupted("code length repeat overflows table"));
        }
        lengths.extend(std::iter::repeat(value).take(repeat));
    }

    let (lit, dist) = lengths.split_at(hlit);
    if lit[END_OF_BLOCK] == 0 {
        return Err(Error::corrupted("missing end-of-block code"));
    }
    Ok(DecompressionTable {
        lit_len: HuffmanDecoder::from_lengths(lit)?,
        dist: HuffmanDecoder::from_lengths(dist)?,
    })
}

/// Decode symbols into `history` until end of block (`Ok(true)`) or until
/// `history` reaches `limit` bytes (`Ok(false)`). A symbol cut short by the
/// end of input is not consumed.
fn decode_codes(
    reader: &mut BitReader<'_>,
    tables: &DecompressionTable,
    history: &mut Vec<u8>,
    limit: usize,
) -> Result<bool> {
    while history.len() < limit {
        let checkpoint = reader.position();
        match decode_symbol(reader, tables, history) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                reader.set_position(checkpoint);
                return Err(e);
            }
        }
    }
    Ok(false)
}

#[inline]
fn decode_symbol(
    reader: &mut BitReader<'_>,
    tables: &DecompressionTable,
    history: &mut Vec<u8>,
) -> Result<bool> {
    let symbol = tables.lit_len.decode(reader)? as usize;
    if symbol < END_OF_BLOCK {
        history.push(symbol as u8);
        return Ok(false);
    }
    if symbol == END_OF_BLOCK {
        return Ok(true);
    }

    let index = symbol - 257;
    if index >= LENGTH_BASE.len() {
        return Err(Error::corrupted(format!("invalid length symbol {symbol}")));
    }
    let length = LENGTH_BASE[index] as usize
        + reader.read_bits(LENGTH_EXTRA_BITS[index] as usize)? as usize;

    let dist_symbol = tables.dist.decode(reader)? as usize;
    if dist_symbol >= DISTANCE_BASE.len() {
        return Err(Error::corrupted(format!("invalid distance symbol {dist_symbol}")));
    }
    let distance = DISTANCE_BASE[dist_symbol] as usize
        + reader.read_bits(DISTANCE_EXTRA_BITS[dist_symbol] as usize)? as usize;

    if distance > history.len() || distance > MAX_DISTANCE {
        return Err(Error::corrupted(format!(
            "distance {distance} exceeds available history"
        )));
    }
    debug_assert!(length <= MAX_MATCH);

    let start = history.len() - distance;
    if distance >= length {
        history.extend_from_within(start..start + length);
    } else {
        for i in 0..length {
            let byte = history[start + i];
            history.push(byte);
        }
    }
    Ok(false)
}

/// Inflate a raw DEFLATE stream held entirely in memory.
pub fn inflate(input: &[u8], output: &mut Vec<u8>) -> Result<()> {
    output.extend_from_slice(&inflate_with(input, InflateOptions::default())?);
    Ok(())
}

/// Inflate a complete stream with explicit framing and coding options.
pub fn inflate_with(input: &[u8], options: InflateOptions) -> Result<Vec<u8>> {
    let mut state = InflateState::new(options)?;
    let mut src = ByteSource::new(input);
    let mut output = Vec::new();
    let mut scratch = vec![0u8; SCRATCH_SIZE];

    loop {
        let mut dst = ByteSink::new(&mut scratch);
        let result = state.step(&mut src, &mut dst, true)?;
        output.extend_from_slice(&scratch[..result.produced]);
        if result.status == Status::Done {
            return Ok(output);
        }
    }
}
