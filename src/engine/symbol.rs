//! Per-symbol cross-venue aggregate: summed levels over eligible venues, the
//! maintained top-N ladders, and the emission / conflation gate.

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::config::ResyncPolicy;
use crate::engine::ladder::TopLevels;
use crate::engine::types::{AggBook, AggLevel, BookDelta, Nanos, PriceTicks, Side, Venue};
use crate::engine::venue::VenueBookState;

/// Summed sizes for one side plus its ladder. Sums are i64 so many venues at
/// `i32::MAX` still add and withdraw exactly.
#[derive(Debug, Clone)]
pub struct AggregateSide {
    levels: AHashMap<PriceTicks, i64>,
    top: TopLevels,
}

impl AggregateSide {
    fn new(side: Side, depth: usize) -> Self {
        Self { levels: AHashMap::new(), top: TopLevels::new(side, depth) }
    }

    /// Add `diff` to the aggregate at `price` and refresh the ladder.
    #[inline]
    fn add(&mut self, price: PriceTicks, diff: i64) {
        if diff == 0 {
            return;
        }
        let sum = self.levels.get(&price).copied().unwrap_or(0) + diff;
        if sum <= 0 {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, sum);
        }
        self.top.touch(price, sum, &self.levels);
    }

    fn withdraw(&mut self, venue_side: &AHashMap<PriceTicks, i32>) {
        for (&price, &size) in venue_side {
            self.add(price, -i64::from(size));
        }
    }

    fn fold_in(&mut self, venue_side: &AHashMap<PriceTicks, i32>) {
        for (&price, &size) in venue_side {
            self.add(price, i64::from(size));
        }
    }

    pub fn levels(&self) -> &AHashMap<PriceTicks, i64> {
        &self.levels
    }

    pub fn top(&self) -> &[AggLevel] {
        self.top.as_slice()
    }
}

#[derive(Debug, Clone)]
pub struct SymbolAggregateState {
    symbol: String,
    venues: AHashMap<Venue, VenueBookState>,
    bids: AggregateSide,
    asks: AggregateSide,
    last_bids: Vec<AggLevel>,
    last_asks: Vec<AggLevel>,
    last_emit_ts: Option<Nanos>,
    last_event_ts: Nanos,
}

impl SymbolAggregateState {
    pub fn new(symbol: impl Into<String>, depth: usize) -> Self {
        Self {
            symbol: symbol.into(),
            venues: AHashMap::new(),
            bids: AggregateSide::new(Side::Bid, depth),
            asks: AggregateSide::new(Side::Ask, depth),
            last_bids: Vec::with_capacity(depth),
            last_asks: Vec::with_capacity(depth),
            last_emit_ts: None,
            last_event_ts: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self, side: Side) -> &AggregateSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn venue(&self, venue: Venue) -> Option<&VenueBookState> {
        self.venues.get(&venue)
    }

    pub fn venues(&self) -> impl Iterator<Item = (&Venue, &VenueBookState)> {
        self.venues.iter()
    }

    /// Fold one venue delta into the venue mirror and, where eligible, the aggregate.
    pub fn apply_delta(&mut self, delta: &BookDelta, resync: ResyncPolicy) {
        let Self { venues, bids, asks, .. } = self;
        let venue = venues.entry(delta.venue).or_insert_with(|| VenueBookState::new(delta.receive_ts));
        let was = [venue.eligible(Side::Bid), venue.eligible(Side::Ask)];

        venue.connected = true;
        venue.last_seen = delta.receive_ts;
        if let Some(status) = delta.status {
            venue.trading_status = status;
        }
        if let Some(seq) = delta.seq {
            venue.observe_seq(seq);
        }

        for (i, side) in [Side::Bid, Side::Ask].into_iter().enumerate() {
            let agg = match side {
                Side::Bid => &mut *bids,
                Side::Ask => &mut *asks,
            };
            let mut contributing = was[i];
            if delta.replaces(side) {
                if contributing {
                    agg.withdraw(venue.side(side));
                    contributing = false;
                }
                venue.clear(side);
                if resync == ResyncPolicy::OnReplace {
                    venue.set_in_sync(side, true);
                }
            }
            match (contributing, venue.eligible(side)) {
                (true, false) => {
                    debug!(symbol = %delta.symbol, venue = %delta.venue, ?side, "venue side left the aggregate");
                    agg.withdraw(venue.side(side));
                }
                (false, true) => agg.fold_in(venue.side(side)),
                _ => {}
            }
        }

        for u in &delta.updates {
            let Some(diff) = venue.set_level(u.side, u.price, u.size) else { continue };
            if venue.eligible(u.side) {
                match u.side {
                    Side::Bid => bids.add(u.price, i64::from(diff)),
                    Side::Ask => asks.add(u.price, i64::from(diff)),
                }
            }
        }

        self.last_event_ts = self.last_event_ts.max(delta.event_ts);
    }

    /// Record liveness for a venue without touching its levels.
    pub fn touch_venue(&mut self, venue: Venue, now: Nanos) {
        let Self { venues, bids, asks, .. } = self;
        if let Some(state) = venues.get_mut(&venue) {
            let was = [state.eligible(Side::Bid), state.eligible(Side::Ask)];
            state.connected = true;
            state.last_seen = now;
            if !was[0] && state.eligible(Side::Bid) {
                bids.fold_in(state.side(Side::Bid));
            }
            if !was[1] && state.eligible(Side::Ask) {
                asks.fold_in(state.side(Side::Ask));
            }
        }
    }

    /// Disconnect venues unseen for longer than `stale_after_ns`. Returns true if any expired.
    pub fn expire_stale(&mut self, now: Nanos, stale_after_ns: i64) -> bool {
        let Self { venues, bids, asks, symbol, .. } = self;
        let mut expired = false;
        for (id, venue) in venues.iter_mut() {
            if !venue.connected || now - venue.last_seen <= stale_after_ns {
                continue;
            }
            if venue.eligible(Side::Bid) {
                bids.withdraw(venue.side(Side::Bid));
            }
            if venue.eligible(Side::Ask) {
                asks.withdraw(venue.side(Side::Ask));
            }
            venue.connected = false;
            expired = true;
            debug!(%symbol, venue = %id, idle_ns = now - venue.last_seen, "venue stale, excluded");
        }
        expired
    }

    fn changed(&self) -> bool {
        self.bids.top() != self.last_bids.as_slice() || self.asks.top() != self.last_asks.as_slice()
    }

    pub fn crossed_or_locked(&self) -> bool {
        match (self.bids.top.best(), self.asks.top.best()) {
            (Some(b), Some(a)) => b.price >= a.price,
            _ => false,
        }
    }

    /// Emission gate: publish when the ladder differs from the last emitted
    /// snapshot or when `min_emit_ns` has elapsed since the last emission.
    pub fn poll_emit(&mut self, now: Nanos, min_emit_ns: i64) -> Option<AggBook> {
        let heartbeat = self.last_emit_ts.map_or(true, |t| now - t >= min_emit_ns);
        if !heartbeat && !self.changed() {
            return None;
        }

        self.last_bids.clear();
        self.last_bids.extend_from_slice(self.bids.top());
        self.last_asks.clear();
        self.last_asks.extend_from_slice(self.asks.top());
        self.last_emit_ts = Some(now);

        trace!(symbol = %self.symbol, bids = self.last_bids.len(), asks = self.last_asks.len(), heartbeat, "emit ladder");
        Some(AggBook {
            symbol: self.symbol.clone(),
            event_ts: self.last_event_ts,
            publish_ts: now,
            bids: self.last_bids.clone(),
            asks: self.last_asks.clone(),
            crossed_or_locked: self.crossed_or_locked(),
        })
    }
}
