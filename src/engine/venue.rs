use ahash::AHashMap;
use tracing::debug;

use crate::engine::types::{Nanos, PriceTicks, Side, TradingStatus};

/// Local mirror of one venue's book for one symbol, plus its eligibility flags.
#[derive(Debug, Clone)]
pub struct VenueBookState {
    bids: AHashMap<PriceTicks, i32>,
    asks: AHashMap<PriceTicks, i32>,
    pub last_seq: Option<u64>,
    pub bids_in_sync: bool,
    pub asks_in_sync: bool,
    pub connected: bool,
    pub trading_status: TradingStatus,
    pub last_seen: Nanos,
}

impl VenueBookState {
    pub fn new(now: Nanos) -> Self {
        Self {
            bids: AHashMap::new(),
            asks: AHashMap::new(),
            last_seq: None,
            bids_in_sync: true,
            asks_in_sync: true,
            connected: true,
            trading_status: TradingStatus::Trading,
            last_seen: now,
        }
    }

    pub fn side(&self, side: Side) -> &AHashMap<PriceTicks, i32> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut AHashMap<PriceTicks, i32> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    pub fn in_sync(&self, side: Side) -> bool {
        match side {
            Side::Bid => self.bids_in_sync,
            Side::Ask => self.asks_in_sync,
        }
    }

    pub fn set_in_sync(&mut self, side: Side, in_sync: bool) {
        match side {
            Side::Bid => self.bids_in_sync = in_sync,
            Side::Ask => self.asks_in_sync = in_sync,
        }
    }

    /// Connected, in sync on this side and trading.
    #[inline]
    pub fn eligible(&self, side: Side) -> bool {
        self.connected && self.in_sync(side) && self.trading_status == TradingStatus::Trading
    }

    /// Track the venue sequence. Returns true when a gap was detected.
    pub fn observe_seq(&mut self, seq: u64) -> bool {
        let gap = match self.last_seq {
            Some(last) => seq != last.wrapping_add(1),
            None => false,
        };
        if gap {
            debug!(last_seq = ?self.last_seq, seq, "sequence gap, venue out of sync");
            self.bids_in_sync = false;
            self.asks_in_sync = false;
        }
        self.last_seq = Some(seq);
        gap
    }

    /// Store `size` at `price` (delete when `size <= 0`).
    /// Returns the size change, or `None` when the level is unchanged.
    pub fn set_level(&mut self, side: Side, price: PriceTicks, size: i32) -> Option<i32> {
        let book = self.side_mut(side);
        let old = book.get(&price).copied().unwrap_or(0);
        let new = size.max(0);
        if old == new {
            return None;
        }
        if new == 0 {
            book.remove(&price);
        } else {
            book.insert(price, new);
        }
        Some(new - old)
    }

    pub fn clear(&mut self, side: Side) {
        self.side_mut(side).clear();
    }

    pub fn level(&self, side: Side, price: PriceTicks) -> i32 {
        self.side(side).get(&price).copied().unwrap_or(0)
    }
}
