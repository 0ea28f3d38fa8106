//! Best bid / offer across venues, computed from per-venue top-of-book quotes.

use ahash::AHashMap;
use tracing::trace;

use crate::engine::types::{AggNbbo, L1Quote, Nanos, NbboSide, Venue};

#[derive(Debug, Clone)]
pub struct VenueQuoteState {
    pub quote: L1Quote,
    pub last_seen: Nanos,
}

#[derive(Debug, Clone, Copy)]
pub struct NbboParams {
    pub stale_after_ns: i64,
    pub min_emit_ns: i64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    side: NbboSide,
    event_ts: Nanos,
    receive_ts: Nanos,
}

impl Candidate {
    // newest event time wins a price tie, then newest receive time
    fn fresher_than(&self, other: &Candidate) -> bool {
        (self.event_ts, self.receive_ts) > (other.event_ts, other.receive_ts)
    }
}

// venue attribution alone does not count as a change
fn px_sz(side: Option<NbboSide>) -> Option<(i32, i32)> {
    side.map(|s| (s.price, s.size))
}

#[derive(Debug, Clone, Default)]
pub struct NbboSymbolState {
    venues: AHashMap<Venue, VenueQuoteState>,
    last: Option<AggNbbo>,
    last_emit_ts: Option<Nanos>,
}

impl NbboSymbolState {
    pub fn venue(&self, venue: Venue) -> Option<&VenueQuoteState> {
        self.venues.get(&venue)
    }

    pub fn last(&self) -> Option<&AggNbbo> {
        self.last.as_ref()
    }

    pub fn on_quote(&mut self, quote: L1Quote, now: Nanos, params: NbboParams) -> Option<AggNbbo> {
        let symbol = quote.symbol.clone();
        let seen = quote.receive_ts;
        self.venues.insert(quote.venue, VenueQuoteState { quote, last_seen: seen });
        self.evaluate(&symbol, now, params)
    }

    pub fn touch_venue(&mut self, venue: Venue, now: Nanos) {
        if let Some(state) = self.venues.get_mut(&venue) {
            state.last_seen = now;
        }
    }

    /// Re-run staleness and the heartbeat gate without a new quote.
    pub fn on_tick(&mut self, symbol: &str, now: Nanos, params: NbboParams) -> Option<AggNbbo> {
        if self.venues.is_empty() {
            return None;
        }
        self.evaluate(symbol, now, params)
    }

    fn best(&self, now: Nanos, stale_after_ns: i64) -> (Option<Candidate>, Option<Candidate>) {
        let mut best_bid: Option<Candidate> = None;
        let mut best_ask: Option<Candidate> = None;

        for state in self.venues.values() {
            if now - state.last_seen > stale_after_ns {
                continue;
            }
            let q = &state.quote;
            if q.bid_sz > 0 {
                let c = Candidate {
                    side: NbboSide { price: q.bid_px, size: q.bid_sz, venue: q.venue },
                    event_ts: q.event_ts,
                    receive_ts: q.receive_ts,
                };
                let take = match &best_bid {
                    None => true,
                    Some(b) => c.side.price > b.side.price || (c.side.price == b.side.price && c.fresher_than(b)),
                };
                if take {
                    best_bid = Some(c);
                }
            }
            if q.ask_sz > 0 {
                let c = Candidate {
                    side: NbboSide { price: q.ask_px, size: q.ask_sz, venue: q.venue },
                    event_ts: q.event_ts,
                    receive_ts: q.receive_ts,
                };
                let take = match &best_ask {
                    None => true,
                    Some(a) => c.side.price < a.side.price || (c.side.price == a.side.price && c.fresher_than(a)),
                };
                if take {
                    best_ask = Some(c);
                }
            }
        }
        (best_bid, best_ask)
    }

    fn evaluate(&mut self, symbol: &str, now: Nanos, params: NbboParams) -> Option<AggNbbo> {
        let (bid, ask) = self.best(now, params.stale_after_ns);
        if bid.is_none() && ask.is_none() {
            return None;
        }

        let best_bid = bid.map(|c| c.side);
        let best_ask = ask.map(|c| c.side);
        let same_content =
            |last: &AggNbbo| px_sz(last.best_bid) == px_sz(best_bid) && px_sz(last.best_ask) == px_sz(best_ask);
        let heartbeat = self.last_emit_ts.map_or(true, |t| now - t >= params.min_emit_ns);
        if !heartbeat && self.last.as_ref().is_some_and(same_content) {
            return None;
        }

        let event_ts = bid.map_or(0, |c| c.event_ts).max(ask.map_or(0, |c| c.event_ts));
        let crossed_or_locked = matches!((best_bid, best_ask), (Some(b), Some(a)) if b.price >= a.price);
        let nbbo = AggNbbo {
            symbol: symbol.to_string(),
            event_ts,
            publish_ts: now,
            best_bid,
            best_ask,
            crossed_or_locked,
        };
        trace!(%symbol, ?best_bid, ?best_ask, crossed_or_locked, "emit nbbo");
        self.last = Some(nbbo.clone());
        self.last_emit_ts = Some(now);
        Some(nbbo)
    }
}

/// All NBBO state owned by one shard.
#[derive(Debug)]
pub struct NbboEngine {
    symbols: AHashMap<String, NbboSymbolState>,
    params: NbboParams,
}

impl NbboEngine {
    pub fn new(params: NbboParams) -> Self {
        Self { symbols: AHashMap::new(), params }
    }

    pub fn on_quote(&mut self, quote: L1Quote, now: Nanos) -> Option<AggNbbo> {
        let params = self.params;
        match self.symbols.get_mut(quote.symbol.as_str()) {
            Some(state) => state.on_quote(quote, now, params),
            None => {
                let symbol = quote.symbol.clone();
                self.symbols.entry(symbol).or_default().on_quote(quote, now, params)
            }
        }
    }

    /// Refresh venue liveness, then re-run the gate since a stale venue may be back.
    pub fn on_heartbeat(&mut self, symbol: &str, venue: Venue, seen: Nanos, now: Nanos) -> Option<AggNbbo> {
        let params = self.params;
        let state = self.symbols.get_mut(symbol)?;
        state.touch_venue(venue, seen);
        state.on_tick(symbol, now, params)
    }

    pub fn on_tick(&mut self, now: Nanos, out: &mut Vec<AggNbbo>) {
        let params = self.params;
        for (symbol, state) in self.symbols.iter_mut() {
            if let Some(nbbo) = state.on_tick(symbol, now, params) {
                out.push(nbbo);
            }
        }
    }

    pub fn symbol(&self, symbol: &str) -> Option<&NbboSymbolState> {
        self.symbols.get(symbol)
    }
}
