use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Nanoseconds since the Unix epoch.
pub type Nanos = i64;

/// Integer price in symbol ticks (`price = ticks / scale`).
pub type PriceTicks = i32;

pub fn now_nanos() -> Nanos {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Nanos)
        .unwrap_or_default()
}

// Liquidity source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Venue(pub u16);

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// True when `a` ranks ahead of `b` on this side of the book.
    #[inline]
    pub fn better(self, a: PriceTicks, b: PriceTicks) -> bool {
        match self {
            Side::Bid => a > b,
            Side::Ask => a < b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TradingStatus {
    Unknown,
    #[default]
    Trading,
    Halted,
    Auction,
    Closed,
}

// One price level change; size 0 deletes the level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpdate {
    pub side: Side,
    pub price: PriceTicks,
    pub size: i32,
}

impl LevelUpdate {
    pub fn bid(price: PriceTicks, size: i32) -> Self {
        Self { side: Side::Bid, price, size }
    }

    pub fn ask(price: PriceTicks, size: i32) -> Self {
        Self { side: Side::Ask, price, size }
    }
}

/// Batched book change from one venue for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct BookDelta {
    pub symbol: String,
    pub venue: Venue,
    pub event_ts: Nanos,
    pub receive_ts: Nanos,
    pub updates: SmallVec<[LevelUpdate; 8]>,
    pub replace_bids: bool,
    pub replace_asks: bool,
    pub seq: Option<u64>,
    pub status: Option<TradingStatus>,
}

impl BookDelta {
    pub fn new(symbol: impl Into<String>, venue: Venue, ts: Nanos) -> Self {
        Self {
            symbol: symbol.into(),
            venue,
            event_ts: ts,
            receive_ts: ts,
            updates: SmallVec::new(),
            replace_bids: false,
            replace_asks: false,
            seq: None,
            status: None,
        }
    }

    pub fn with_updates(mut self, updates: impl IntoIterator<Item = LevelUpdate>) -> Self {
        self.updates.extend(updates);
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_status(mut self, status: TradingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn replacing(mut self, bids: bool, asks: bool) -> Self {
        self.replace_bids = bids;
        self.replace_asks = asks;
        self
    }

    pub fn replaces(&self, side: Side) -> bool {
        match side {
            Side::Bid => self.replace_bids,
            Side::Ask => self.replace_asks,
        }
    }
}

/// Top-of-book quote from one venue (ticks / lots). A side with size <= 0 is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Quote {
    pub symbol: String,
    pub venue: Venue,
    pub event_ts: Nanos,
    pub receive_ts: Nanos,
    pub bid_px: PriceTicks,
    pub bid_sz: i32,
    pub ask_px: PriceTicks,
    pub ask_sz: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePrint {
    pub symbol: String,
    pub venue: Venue,
    pub event_ts: Nanos,
    pub receive_ts: Nanos,
    pub price: PriceTicks,
    pub size: i32,
}

/// Everything a venue adapter can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Book(BookDelta),
    Quote(L1Quote),
    Trade(TradePrint),
    Heartbeat { symbol: String, venue: Venue, receive_ts: Nanos },
}

impl FeedEvent {
    pub fn symbol(&self) -> &str {
        match self {
            FeedEvent::Book(d) => &d.symbol,
            FeedEvent::Quote(q) => &q.symbol,
            FeedEvent::Trade(t) => &t.symbol,
            FeedEvent::Heartbeat { symbol, .. } => symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggLevel {
    pub price: PriceTicks,
    pub size: i32,
}

impl AggLevel {
    pub const fn new(price: PriceTicks, size: i32) -> Self {
        Self { price, size }
    }
}

/// Aggregated depth-limited ladder for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggBook {
    pub symbol: String,
    pub event_ts: Nanos,
    pub publish_ts: Nanos,
    pub bids: Vec<AggLevel>, // desc by price
    pub asks: Vec<AggLevel>, // asc by price
    pub crossed_or_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NbboSide {
    pub price: PriceTicks,
    pub size: i32,
    pub venue: Venue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggNbbo {
    pub symbol: String,
    pub event_ts: Nanos,
    pub publish_ts: Nanos,
    pub best_bid: Option<NbboSide>,
    pub best_ask: Option<NbboSide>,
    pub crossed_or_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggTrade {
    pub symbol: String,
    pub event_ts: Nanos,
    pub publish_ts: Nanos,
    pub price: PriceTicks,
    pub size: i32,
    pub venue: Venue,
}

/// Canonical output stream item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggEvent {
    Book(AggBook),
    Nbbo(AggNbbo),
    Trade(AggTrade),
}

impl AggEvent {
    pub fn symbol(&self) -> &str {
        match self {
            AggEvent::Book(b) => &b.symbol,
            AggEvent::Nbbo(n) => &n.symbol,
            AggEvent::Trade(t) => &t.symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AggEvent::Book(_) => "book",
            AggEvent::Nbbo(_) => "nbbo",
            AggEvent::Trade(_) => "trade",
        }
    }
}
