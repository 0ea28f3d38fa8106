//! Little-endian wire layout for one ladder snapshot:
//!
//! ```text
//! u8 type | u16 symLen | symLen ASCII | i64 publishTs | u8 bidCount | u8 askCount
//!   | bidCount x (i32 px, i32 sz) | askCount x (i32 px, i32 sz) | u8 crossed
//! ```

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::engine::types::{AggBook, AggLevel, Nanos};
use crate::error::{AggError, AggResult};

pub const FRAME_TYPE_LADDER: u8 = 0x01;

const LEVEL_LEN: usize = 8;
// type + symLen + publishTs + counts + crossed
const FIXED_LEN: usize = 1 + 2 + 8 + 1 + 1 + 1;

/// Decoded form of one ladder frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LadderFrame {
    pub symbol: String,
    pub publish_ts: Nanos,
    pub bids: Vec<AggLevel>,
    pub asks: Vec<AggLevel>,
    pub crossed_or_locked: bool,
}

impl From<&AggBook> for LadderFrame {
    fn from(book: &AggBook) -> Self {
        Self {
            symbol: book.symbol.clone(),
            publish_ts: book.publish_ts,
            bids: book.bids.clone(),
            asks: book.asks.clone(),
            crossed_or_locked: book.crossed_or_locked,
        }
    }
}

fn wire_counts(book: &AggBook) -> (usize, usize, usize) {
    let sym = book.symbol.chars().count().min(u16::MAX as usize);
    let bids = book.bids.len().min(u8::MAX as usize);
    let asks = book.asks.len().min(u8::MAX as usize);
    (sym, bids, asks)
}

pub fn encoded_len(book: &AggBook) -> usize {
    let (sym, bids, asks) = wire_counts(book);
    FIXED_LEN + sym + (bids + asks) * LEVEL_LEN
}

/// Encode `book` into `buf`. Returns the number of bytes written, or the
/// negated size required when `buf` is too small (nothing is written then).
///
/// Non-ASCII symbol characters are written as `?`.
pub fn encode_agg_book(buf: &mut [u8], book: &AggBook) -> isize {
    let needed = encoded_len(book);
    if buf.len() < needed {
        return -(needed as isize);
    }
    let (sym_len, bid_count, ask_count) = wire_counts(book);

    buf[0] = FRAME_TYPE_LADDER;
    LittleEndian::write_u16(&mut buf[1..3], sym_len as u16);
    let mut o = 3;
    for ch in book.symbol.chars().take(sym_len) {
        buf[o] = if ch.is_ascii() { ch as u8 } else { b'?' };
        o += 1;
    }
    LittleEndian::write_i64(&mut buf[o..o + 8], book.publish_ts);
    o += 8;
    buf[o] = bid_count as u8;
    buf[o + 1] = ask_count as u8;
    o += 2;
    for level in book.bids.iter().take(bid_count).chain(book.asks.iter().take(ask_count)) {
        LittleEndian::write_i32(&mut buf[o..o + 4], level.price);
        LittleEndian::write_i32(&mut buf[o + 4..o + 8], level.size);
        o += LEVEL_LEN;
    }
    buf[o] = u8::from(book.crossed_or_locked);
    (o + 1) as isize
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> AggResult<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(AggError::FrameTruncated { needed: end, available: self.buf.len() });
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> AggResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn levels(&mut self, count: usize) -> AggResult<Vec<AggLevel>> {
        let raw = self.take(count * LEVEL_LEN)?;
        Ok(raw
            .chunks_exact(LEVEL_LEN)
            .map(|c| AggLevel::new(LittleEndian::read_i32(&c[..4]), LittleEndian::read_i32(&c[4..])))
            .collect())
    }
}

pub fn decode_agg_book(buf: &[u8]) -> AggResult<LadderFrame> {
    let mut cur = Cursor { buf, pos: 0 };
    let frame_type = cur.u8()?;
    if frame_type != FRAME_TYPE_LADDER {
        return Err(AggError::UnknownFrameType(frame_type));
    }
    let sym_len = LittleEndian::read_u16(cur.take(2)?) as usize;
    let symbol = cur.take(sym_len)?.iter().map(|&b| b as char).collect();
    let publish_ts = LittleEndian::read_i64(cur.take(8)?);
    let bid_count = cur.u8()? as usize;
    let ask_count = cur.u8()? as usize;
    let bids = cur.levels(bid_count)?;
    let asks = cur.levels(ask_count)?;
    let crossed_or_locked = cur.u8()? != 0;
    Ok(LadderFrame { symbol, publish_ts, bids, asks, crossed_or_locked })
}
