//! Property tests: the incremental aggregate always matches a full recomputation.

use std::collections::{BTreeMap, HashMap};

use mdagg_rs::config::ResyncPolicy;
use mdagg_rs::engine::ladder::TopLevels;
use mdagg_rs::engine::nbbo::{NbboEngine, NbboParams};
use mdagg_rs::engine::types::{BookDelta, L1Quote, LevelUpdate, Nanos, Side, TradingStatus, Venue};
use mdagg_rs::engine::SymbolAggregateState;
use proptest::prelude::*;

const MS: Nanos = 1_000_000;
const STALE: Nanos = 250 * MS;

#[derive(Debug, Clone)]
enum Op {
    Level { venue: u16, side: Side, price: i32, size: i32 },
    Seq { venue: u16, skip: bool },
    Status { venue: u16, trading: bool },
    Replace { venue: u16, side: Side, levels: Vec<(i32, i32)> },
    Idle,
    Touch { venue: u16 },
}

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Bid), Just(Side::Ask)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (1u16..4, arb_side(), 95i32..106, -2i32..20)
            .prop_map(|(venue, side, price, size)| Op::Level { venue, side, price, size }),
        1 => (1u16..4, any::<bool>()).prop_map(|(venue, skip)| Op::Seq { venue, skip }),
        1 => (1u16..4, any::<bool>()).prop_map(|(venue, trading)| Op::Status { venue, trading }),
        1 => (1u16..4, arb_side(), prop::collection::vec((95i32..106, 1i32..20), 0..5))
            .prop_map(|(venue, side, levels)| Op::Replace { venue, side, levels }),
        1 => Just(Op::Idle),
        1 => (1u16..4).prop_map(|venue| Op::Touch { venue }),
    ]
}

struct Driver {
    state: SymbolAggregateState,
    resync: ResyncPolicy,
    now: Nanos,
    seqs: HashMap<u16, u64>,
}

impl Driver {
    fn apply(&mut self, op: Op) {
        self.now += MS;
        let now = self.now;
        let delta = |venue: u16| BookDelta::new("SYM", Venue(venue), now);
        match op {
            Op::Level { venue, side, price, size } => {
                let d = delta(venue).with_updates([LevelUpdate { side, price, size }]);
                self.state.apply_delta(&d, self.resync);
            }
            Op::Seq { venue, skip } => {
                let seq = self.seqs.entry(venue).or_insert(0);
                *seq += if skip { 2 } else { 1 };
                let d = delta(venue).with_seq(*seq);
                self.state.apply_delta(&d, self.resync);
            }
            Op::Status { venue, trading } => {
                let status = if trading { TradingStatus::Trading } else { TradingStatus::Halted };
                self.state.apply_delta(&delta(venue).with_status(status), self.resync);
            }
            Op::Replace { venue, side, levels } => {
                let updates = levels.into_iter().map(|(price, size)| LevelUpdate { side, price, size });
                let d = delta(venue).with_updates(updates).replacing(side == Side::Bid, side == Side::Ask);
                self.state.apply_delta(&d, self.resync);
            }
            Op::Idle => {
                self.now += 2 * STALE;
                self.state.expire_stale(self.now, STALE);
            }
            Op::Touch { venue } => self.state.touch_venue(Venue(venue), now),
        }
    }
}

fn recomputed(state: &SymbolAggregateState, side: Side) -> BTreeMap<i32, i64> {
    let mut sum = BTreeMap::new();
    for (_, venue) in state.venues() {
        if venue.eligible(side) {
            for (&price, &size) in venue.side(side) {
                *sum.entry(price).or_insert(0) += i64::from(size);
            }
        }
    }
    sum
}

fn check(state: &SymbolAggregateState, depth: usize) -> Result<(), TestCaseError> {
    for side in [Side::Bid, Side::Ask] {
        let agg: BTreeMap<i32, i64> = state.side(side).levels().iter().map(|(p, s)| (*p, *s)).collect();
        prop_assert_eq!(&agg, &recomputed(state, side));
        prop_assert!(agg.values().all(|s| *s > 0));
        for (_, venue) in state.venues() {
            prop_assert!(venue.side(side).values().all(|s| *s > 0));
        }

        let top = state.side(side).top();
        prop_assert!(top.len() <= depth);
        prop_assert!(top.windows(2).all(|w| side.better(w[0].price, w[1].price)));
        prop_assert_eq!(top.to_vec(), TopLevels::from_aggregate(side, depth, state.side(side).levels()));
    }
    Ok(())
}

proptest! {
    #[test]
    fn aggregate_matches_recomputation(
        depth in 1usize..6,
        never in any::<bool>(),
        ops in prop::collection::vec(arb_op(), 1..200),
    ) {
        let resync = if never { ResyncPolicy::Never } else { ResyncPolicy::OnReplace };
        let mut driver = Driver { state: SymbolAggregateState::new("SYM", depth), resync, now: 0, seqs: HashMap::new() };
        for op in ops {
            driver.apply(op);
            check(&driver.state, depth)?;
        }
    }

    #[test]
    fn identical_update_counts_once(price in 95i32..106, size in 1i32..100, repeats in 1usize..5) {
        let mut state = SymbolAggregateState::new("SYM", 5);
        let d = BookDelta::new("SYM", Venue(1), 0).with_updates([LevelUpdate::bid(price, size)]);
        for _ in 0..repeats {
            state.apply_delta(&d, ResyncPolicy::OnReplace);
        }
        prop_assert_eq!(state.side(Side::Bid).levels().get(&price).copied(), Some(i64::from(size)));
    }

    #[test]
    fn nbbo_picks_extremes_of_fresh_venues(
        quotes in prop::collection::vec((1u16..5, 90i32..110, 0i32..10, 90i32..110, 0i32..10, 0i64..400), 1..30),
    ) {
        let params = NbboParams { stale_after_ns: STALE, min_emit_ns: 0 };
        let mut engine = NbboEngine::new(params);
        let mut latest: HashMap<u16, (i32, i32, i32, i32, Nanos)> = HashMap::new();
        let mut now = 0;
        for (venue, bid_px, bid_sz, ask_px, ask_sz, gap_ms) in quotes {
            now += gap_ms * MS;
            latest.insert(venue, (bid_px, bid_sz, ask_px, ask_sz, now));
            let quote = L1Quote {
                symbol: "SYM".into(),
                venue: Venue(venue),
                event_ts: now,
                receive_ts: now,
                bid_px,
                bid_sz,
                ask_px,
                ask_sz,
            };
            let emitted = engine.on_quote(quote, now);

            let fresh: Vec<_> = latest.values().filter(|q| now - q.4 <= STALE).collect();
            let best_bid = fresh.iter().filter(|q| q.1 > 0).map(|q| q.0).max();
            let best_ask = fresh.iter().filter(|q| q.3 > 0).map(|q| q.2).min();
            let nbbo = engine.symbol("SYM").and_then(|s| s.last()).cloned();
            if best_bid.is_none() && best_ask.is_none() {
                prop_assert!(emitted.is_none());
                continue;
            }
            // min_emit 0: every evaluation with a side publishes
            let nbbo = nbbo.unwrap();
            prop_assert_eq!(nbbo.best_bid.map(|s| s.price), best_bid);
            prop_assert_eq!(nbbo.best_ask.map(|s| s.price), best_ask);
            prop_assert_eq!(
                nbbo.crossed_or_locked,
                matches!((best_bid, best_ask), (Some(b), Some(a)) if b >= a)
            );
        }
    }
}
