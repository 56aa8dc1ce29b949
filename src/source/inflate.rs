//! Raw-DEFLATE decoder with checkpointable state.
//!
//! Between blocks the decoder's live state collapses to the input bit
//! position, the residual bits of a partially consumed byte, the final-block
//! flag, and the 32 KiB sliding window. That is exactly what
//! [`FlateState`](crate::checkpoint::FlateState) carries, so a decode can be
//! suspended at any block boundary and picked up bit-exactly later. Inside a
//! block the Huffman tables and any half-finished back-reference copy stay
//! in memory and are never serialized.

use once_cell::sync::Lazy;

use crate::checkpoint::FlateState;
use crate::error::{Error, Result};
use crate::source::Source;

pub(crate) const WINDOW_SIZE: usize = 32 * 1024;

const MAX_CODE_LEN: usize = 15;
const MAX_LITERAL_SYMBOLS: usize = 286;
const MAX_DISTANCE_SYMBOLS: usize = 30;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];
const LENGTH_EXTRA: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u32; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
    13, 13,
];
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

static FIXED_LITERAL: Lazy<Huffman> = Lazy::new(|| {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    Huffman::build(&lengths)
        .expect("fixed literal/length table is well-formed")
        .0
});

static FIXED_DISTANCE: Lazy<Huffman> = Lazy::new(|| {
    Huffman::build(&[5u8; 30])
        .expect("fixed distance table is well-formed")
        .0
});

/// LSB-first bit reader that accounts for every consumed bit, so a block
/// boundary can be mapped back to an exact byte position in the compressed
/// stream.
struct BitReader {
    buf: u64,
    count: u32,
    consumed: u64,
}

impl BitReader {
    fn new() -> Self {
        Self {
            buf: 0,
            count: 0,
            consumed: 0,
        }
    }

    fn need<S: Source + ?Sized>(&mut self, src: &mut S, n: u32) -> Result<()> {
        while self.count < n {
            match src.read_byte()? {
                Some(byte) => {
                    self.buf |= (byte as u64) << self.count;
                    self.count += 8;
                }
                None => return Err(Error::Decode("unexpected end of compressed stream")),
            }
        }
        Ok(())
    }

    fn bits<S: Source + ?Sized>(&mut self, src: &mut S, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        self.need(src, n)?;
        let value = (self.buf & ((1u64 << n) - 1)) as u32;
        self.buf >>= n;
        self.count -= n;
        self.consumed += n as u64;
        Ok(value)
    }

    /// Skip to the next byte boundary. The remainder of the current byte is
    /// always buffered, so this never needs input.
    fn align(&mut self) {
        let partial = (self.consumed % 8) as u32;
        if partial != 0 {
            let skip = 8 - partial;
            self.buf >>= skip;
            self.count -= skip;
            self.consumed += skip as u64;
        }
    }

    fn consumed_bits(&self) -> u64 {
        self.consumed
    }

    /// The still-unconsumed bits of the partially consumed byte, as
    /// `(count, value)` with `count` in `0..=7`.
    fn residual(&self) -> (u8, u8) {
        let rem = ((8 - self.consumed % 8) % 8) as u32;
        let value = (self.buf & ((1u64 << rem) - 1)) as u8;
        (rem as u8, value)
    }

    fn restore(&mut self, consumed: u64, residual_count: u8, residual_bits: u8) {
        self.count = residual_count as u32;
        self.buf = (residual_bits as u64) & ((1u64 << self.count) - 1);
        self.consumed = consumed;
    }
}

/// Canonical Huffman decoding table: symbol counts per code length plus
/// symbols sorted by (length, symbol order).
#[derive(Clone)]
struct Huffman {
    count: [u16; MAX_CODE_LEN + 1],
    symbol: Vec<u16>,
}

impl Huffman {
    /// Build from per-symbol code lengths. Returns the table and the number
    /// of unused codes: zero for a complete set, positive for an incomplete
    /// one. Over-subscribed sets are an error.
    fn build(lengths: &[u8]) -> Result<(Self, i32)> {
        let mut count = [0u16; MAX_CODE_LEN + 1];
        for &len in lengths {
            if len as usize > MAX_CODE_LEN {
                return Err(Error::Decode("code length exceeds 15 bits"));
            }
            count[len as usize] += 1;
        }

        if count[0] as usize == lengths.len() {
            // no codes assigned at all; decoding will fail if attempted
            return Ok((
                Self {
                    count,
                    symbol: Vec::new(),
                },
                0,
            ));
        }

        let mut left: i32 = 1;
        for len in 1..=MAX_CODE_LEN {
            left <<= 1;
            left -= count[len] as i32;
            if left < 0 {
                return Err(Error::Decode("over-subscribed code set"));
            }
        }

        let mut offs = [0u16; MAX_CODE_LEN + 1];
        for len in 1..MAX_CODE_LEN {
            offs[len + 1] = offs[len] + count[len];
        }

        let mut symbol = vec![0u16; lengths.len()];
        for (sym, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbol[offs[len as usize] as usize] = sym as u16;
                offs[len as usize] += 1;
            }
        }

        Ok((Self { count, symbol }, left))
    }

    /// An incomplete code set is tolerable only when every code is 0 or 1
    /// bits long (a single-symbol table).
    fn tolerates_incompleteness(&self, symbols: usize) -> bool {
        (self.count[0] + self.count[1]) as usize == symbols
    }
}

fn decode_symbol<S: Source + ?Sized>(
    bits: &mut BitReader,
    src: &mut S,
    huffman: &Huffman,
) -> Result<u16> {
    let mut code: u32 = 0;
    let mut first: u32 = 0;
    let mut index: u32 = 0;
    for len in 1..=MAX_CODE_LEN {
        code |= bits.bits(src, 1)?;
        let count = huffman.count[len] as u32;
        if code < first + count {
            return Ok(huffman.symbol[(index + (code - first)) as usize]);
        }
        index += count;
        first = (first + count) << 1;
        code <<= 1;
    }
    Err(Error::Decode("ran out of codes"))
}

/// 32 KiB sliding history for back-references.
struct Window {
    data: Box<[u8; WINDOW_SIZE]>,
    pos: usize,
    filled: usize,
}

impl Window {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; WINDOW_SIZE]),
            pos: 0,
            filled: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.data[self.pos] = byte;
        self.pos = (self.pos + 1) % WINDOW_SIZE;
        if self.filled < WINDOW_SIZE {
            self.filled += 1;
        }
    }

    fn filled(&self) -> usize {
        self.filled
    }

    /// Byte `dist` positions back; caller guarantees `1 <= dist <= filled`.
    fn at_distance(&self, dist: usize) -> u8 {
        self.data[(self.pos + WINDOW_SIZE - dist) % WINDOW_SIZE]
    }

    /// History in stream order, oldest first.
    fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.filled);
        if self.filled < WINDOW_SIZE {
            out.extend_from_slice(&self.data[..self.filled]);
        } else {
            out.extend_from_slice(&self.data[self.pos..]);
            out.extend_from_slice(&self.data[..self.pos]);
        }
        out
    }

    fn restore(&mut self, bytes: &[u8]) {
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.filled = bytes.len();
        self.pos = bytes.len() % WINDOW_SIZE;
    }
}

struct PendingCopy {
    remaining: u16,
    dist: u16,
}

struct HuffmanBlock {
    lit: Huffman,
    dist: Huffman,
    pending: Option<PendingCopy>,
}

enum BlockState {
    Boundary,
    Stored { remaining: u32 },
    Huffman(Box<HuffmanBlock>),
}

pub(crate) struct Inflater {
    bits: BitReader,
    window: Window,
    state: BlockState,
    final_block: bool,
    done: bool,
}

impl Inflater {
    pub(crate) fn new() -> Self {
        Self {
            bits: BitReader::new(),
            window: Window::new(),
            state: BlockState::Boundary,
            final_block: false,
            done: false,
        }
    }

    /// True exactly when the decoder sits between blocks (or past the final
    /// one), the only legal place to snapshot.
    pub(crate) fn at_boundary(&self) -> bool {
        matches!(self.state, BlockState::Boundary)
    }

    pub(crate) fn snapshot(&self) -> FlateState {
        let (residual_count, residual_bits) = self.bits.residual();
        FlateState {
            input_offset: self.bits.consumed_bits().div_ceil(8),
            residual_count,
            residual_bits,
            final_block: self.final_block,
            window: self.window.snapshot(),
        }
    }

    pub(crate) fn restore(state: &FlateState) -> Result<Self> {
        if state.residual_count > 7 {
            return Err(Error::Checkpoint(format!(
                "residual bit count {} out of range",
                state.residual_count
            )));
        }
        if state.window.len() > WINDOW_SIZE {
            return Err(Error::Checkpoint(format!(
                "window of {} bytes exceeds 32 KiB",
                state.window.len()
            )));
        }
        let consumed = (state.input_offset * 8)
            .checked_sub(state.residual_count as u64)
            .ok_or_else(|| Error::Checkpoint("residual bits before stream start".into()))?;

        let mut inflater = Self::new();
        inflater
            .bits
            .restore(consumed, state.residual_count, state.residual_bits);
        inflater.window.restore(&state.window);
        inflater.final_block = state.final_block;
        inflater.done = state.final_block;
        Ok(inflater)
    }

    /// Decode into `out`. Returns the number of bytes produced; `Ok(0)` on a
    /// non-empty buffer means the stream is finished. With
    /// `stop_at_boundary`, returns short at each completed block so the
    /// caller can interrogate [`at_boundary`](Self::at_boundary).
    pub(crate) fn read<S: Source + ?Sized>(
        &mut self,
        src: &mut S,
        out: &mut [u8],
        stop_at_boundary: bool,
    ) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut n = 0usize;
        loop {
            if self.at_boundary() {
                if self.done || (stop_at_boundary && n > 0) {
                    return Ok(n);
                }
                self.begin_block(src)?;
                continue;
            }

            let block_done = match &mut self.state {
                BlockState::Boundary => unreachable!("boundary handled above"),
                BlockState::Stored { remaining } => {
                    while *remaining > 0 && n < out.len() {
                        let byte = self.bits.bits(src, 8)? as u8;
                        out[n] = byte;
                        n += 1;
                        self.window.push(byte);
                        *remaining -= 1;
                    }
                    *remaining == 0
                }
                BlockState::Huffman(block) => {
                    let mut end_of_block = false;
                    loop {
                        if let Some(copy) = &mut block.pending {
                            while copy.remaining > 0 && n < out.len() {
                                let byte = self.window.at_distance(copy.dist as usize);
                                out[n] = byte;
                                n += 1;
                                self.window.push(byte);
                                copy.remaining -= 1;
                            }
                            if copy.remaining > 0 {
                                break;
                            }
                            block.pending = None;
                        }
                        if n == out.len() {
                            break;
                        }

                        let symbol = decode_symbol(&mut self.bits, src, &block.lit)?;
                        match symbol {
                            0..=255 => {
                                out[n] = symbol as u8;
                                n += 1;
                                self.window.push(symbol as u8);
                            }
                            256 => {
                                end_of_block = true;
                                break;
                            }
                            257..=285 => {
                                let idx = (symbol - 257) as usize;
                                let len = LENGTH_BASE[idx]
                                    + self.bits.bits(src, LENGTH_EXTRA[idx])? as u16;
                                let dsym =
                                    decode_symbol(&mut self.bits, src, &block.dist)? as usize;
                                if dsym >= MAX_DISTANCE_SYMBOLS {
                                    return Err(Error::Decode("invalid distance code"));
                                }
                                let dist = DIST_BASE[dsym] as u32
                                    + self.bits.bits(src, DIST_EXTRA[dsym])?;
                                if dist as usize > self.window.filled() {
                                    return Err(Error::Decode("distance too far back"));
                                }
                                block.pending = Some(PendingCopy {
                                    remaining: len,
                                    dist: dist as u16,
                                });
                            }
                            _ => return Err(Error::Decode("invalid literal/length code")),
                        }
                    }
                    end_of_block
                }
            };

            if block_done {
                self.state = BlockState::Boundary;
                if self.final_block {
                    self.done = true;
                }
            } else if n == out.len() {
                return Ok(n);
            }
        }
    }

    fn begin_block<S: Source + ?Sized>(&mut self, src: &mut S) -> Result<()> {
        self.final_block = self.bits.bits(src, 1)? == 1;
        match self.bits.bits(src, 2)? {
            0 => {
                self.bits.align();
                let len = self.bits.bits(src, 16)?;
                let nlen = self.bits.bits(src, 16)?;
                if len != (!nlen & 0xFFFF) {
                    return Err(Error::Decode("stored block length check failed"));
                }
                self.state = BlockState::Stored { remaining: len };
            }
            1 => {
                self.state = BlockState::Huffman(Box::new(HuffmanBlock {
                    lit: FIXED_LITERAL.clone(),
                    dist: FIXED_DISTANCE.clone(),
                    pending: None,
                }));
            }
            2 => {
                let (lit, dist) = self.read_dynamic_tables(src)?;
                self.state = BlockState::Huffman(Box::new(HuffmanBlock {
                    lit,
                    dist,
                    pending: None,
                }));
            }
            _ => return Err(Error::Decode("invalid block type")),
        }
        Ok(())
    }

    fn read_dynamic_tables<S: Source + ?Sized>(
        &mut self,
        src: &mut S,
    ) -> Result<(Huffman, Huffman)> {
        let nlen = self.bits.bits(src, 5)? as usize + 257;
        let ndist = self.bits.bits(src, 5)? as usize + 1;
        let ncode = self.bits.bits(src, 4)? as usize + 4;
        if nlen > MAX_LITERAL_SYMBOLS || ndist > MAX_DISTANCE_SYMBOLS {
            return Err(Error::Decode("too many length or distance symbols"));
        }

        let mut lengths = [0u8; MAX_LITERAL_SYMBOLS + MAX_DISTANCE_SYMBOLS];
        let mut code_lengths = [0u8; 19];
        for &order in CODE_LENGTH_ORDER.iter().take(ncode) {
            code_lengths[order] = self.bits.bits(src, 3)? as u8;
        }

        let (code_table, left) = Huffman::build(&code_lengths)?;
        if left != 0 {
            return Err(Error::Decode("incomplete code length code"));
        }

        let mut index = 0;
        while index < nlen + ndist {
            let symbol = decode_symbol(&mut self.bits, src, &code_table)?;
            match symbol {
                0..=15 => {
                    lengths[index] = symbol as u8;
                    index += 1;
                }
                16 => {
                    if index == 0 {
                        return Err(Error::Decode("repeat with no previous length"));
                    }
                    let value = lengths[index - 1];
                    let repeat = 3 + self.bits.bits(src, 2)? as usize;
                    fill_lengths(&mut lengths, &mut index, nlen + ndist, value, repeat)?;
                }
                17 => {
                    let repeat = 3 + self.bits.bits(src, 3)? as usize;
                    fill_lengths(&mut lengths, &mut index, nlen + ndist, 0, repeat)?;
                }
                18 => {
                    let repeat = 11 + self.bits.bits(src, 7)? as usize;
                    fill_lengths(&mut lengths, &mut index, nlen + ndist, 0, repeat)?;
                }
                _ => return Err(Error::Decode("invalid code length symbol")),
            }
        }

        if lengths[256] == 0 {
            return Err(Error::Decode("missing end-of-block code"));
        }

        let (lit, left) = Huffman::build(&lengths[..nlen])?;
        if left > 0 && !lit.tolerates_incompleteness(nlen) {
            return Err(Error::Decode("incomplete literal/length code"));
        }
        let (dist, left) = Huffman::build(&lengths[nlen..nlen + ndist])?;
        if left > 0 && !dist.tolerates_incompleteness(ndist) {
            return Err(Error::Decode("incomplete distance code"));
        }

        Ok((lit, dist))
    }
}

fn fill_lengths(
    lengths: &mut [u8],
    index: &mut usize,
    limit: usize,
    value: u8,
    repeat: usize,
) -> Result<()> {
    if *index + repeat > limit {
        return Err(Error::Decode("code length repeat past end of tables"));
    }
    lengths[*index..*index + repeat].fill(value);
    *index += repeat;
    Ok(())
}
