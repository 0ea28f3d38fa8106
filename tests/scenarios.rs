//! End-to-end behaviour of one shard with explicit clocks.

use mdagg_rs::config::{EngineConfig, ResyncPolicy};
use mdagg_rs::engine::types::{AggBook, AggEvent, AggLevel, BookDelta, FeedEvent, LevelUpdate, Nanos, Side, Venue};
use mdagg_rs::engine::ShardState;

const MS: Nanos = 1_000_000;

fn shard(depth: usize, resync: ResyncPolicy) -> ShardState {
    let cfg = EngineConfig { depth, resync, min_emit_interval_ms: 10, venue_stale_after_ms: 250, ..EngineConfig::default() };
    ShardState::new(0, &cfg)
}

fn delta(venue: u16, ts: Nanos, updates: &[LevelUpdate]) -> BookDelta {
    BookDelta::new("AAPL", Venue(venue), ts).with_updates(updates.iter().copied())
}

fn books(out: &[AggEvent]) -> Vec<AggBook> {
    out.iter()
        .filter_map(|e| match e {
            AggEvent::Book(b) => Some(b.clone()),
            _ => None,
        })
        .collect()
}

/// Feed one delta and return the ladder state afterwards (emitted or not).
fn apply(s: &mut ShardState, d: BookDelta, now: Nanos) -> Vec<AggEvent> {
    let mut out = Vec::new();
    s.process(FeedEvent::Book(d), now, &mut out);
    out
}

fn ladder(s: &ShardState, side: Side) -> Vec<AggLevel> {
    s.symbol("AAPL").map(|st| st.side(side).top().to_vec()).unwrap_or_default()
}

#[test]
fn sum_and_depth() {
    let mut s = shard(2, ResyncPolicy::OnReplace);
    apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 10), LevelUpdate::bid(99, 5), LevelUpdate::ask(101, 8)]), 0);
    let out = apply(&mut s, delta(2, MS, &[LevelUpdate::bid(100, 3), LevelUpdate::ask(101, 2)]), MS);

    let emitted = books(&out);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].bids, vec![AggLevel::new(100, 13), AggLevel::new(99, 5)]);
    assert_eq!(emitted[0].asks, vec![AggLevel::new(101, 10)]);
    assert!(!emitted[0].crossed_or_locked);
    assert_eq!(emitted[0].event_ts, MS);
}

#[test]
fn deeper_level_is_promoted_when_top_empties() {
    let mut s = shard(2, ResyncPolicy::OnReplace);
    apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 1), LevelUpdate::bid(99, 1), LevelUpdate::bid(98, 1)]), 0);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(100, 1), AggLevel::new(99, 1)]);
    apply(&mut s, delta(1, MS, &[LevelUpdate::bid(100, 0)]), MS);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(99, 1), AggLevel::new(98, 1)]);
}

#[test]
fn stale_venue_drops_out() {
    let mut s = shard(5, ResyncPolicy::OnReplace);
    apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 10)]), 0);
    apply(&mut s, delta(2, 0, &[LevelUpdate::bid(100, 3), LevelUpdate::bid(98, 4)]), 0);

    // V2 goes silent; V1 keeps quoting
    let out = apply(&mut s, delta(1, 300 * MS, &[LevelUpdate::bid(100, 11)]), 300 * MS);
    let emitted = books(&out);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].bids, vec![AggLevel::new(100, 11)]);

    // V2 is back: its mirror folds in again
    let out = apply(&mut s, delta(2, 301 * MS, &[LevelUpdate::bid(97, 1)]), 301 * MS);
    assert_eq!(
        books(&out)[0].bids,
        vec![AggLevel::new(100, 14), AggLevel::new(98, 4), AggLevel::new(97, 1)]
    );
}

#[test]
fn gap_then_replace_restores_contribution() {
    let mut s = shard(5, ResyncPolicy::OnReplace);
    apply(&mut s, delta(2, 0, &[LevelUpdate::bid(100, 3)]), 0);
    apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 10)]).with_seq(1), 0);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(100, 13)]);

    // seq 2 is lost
    apply(&mut s, delta(1, MS, &[LevelUpdate::bid(99, 5)]).with_seq(3), MS);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(100, 3)]);
    let v1 = s.symbol("AAPL").unwrap().venue(Venue(1)).unwrap();
    assert!(!v1.eligible(Side::Bid));
    assert_eq!(v1.level(Side::Bid, 99), 5);

    // out-of-sync deltas only touch the mirror
    apply(&mut s, delta(1, 2 * MS, &[LevelUpdate::bid(101, 7)]).with_seq(4), 2 * MS);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(100, 3)]);
    assert_eq!(s.symbol("AAPL").unwrap().venue(Venue(1)).unwrap().level(Side::Bid, 101), 7);

    let snapshot = delta(1, 3 * MS, &[LevelUpdate::bid(100, 8), LevelUpdate::ask(102, 4)]).with_seq(10).replacing(true, true);
    apply(&mut s, snapshot, 3 * MS);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(100, 11)]);
    assert_eq!(ladder(&s, Side::Ask), vec![AggLevel::new(102, 4)]);

    // the replace re-baselined the sequence
    apply(&mut s, delta(1, 4 * MS, &[LevelUpdate::bid(99, 1)]).with_seq(11), 4 * MS);
    assert_eq!(ladder(&s, Side::Bid), vec![AggLevel::new(100, 11), AggLevel::new(99, 1)]);
}

#[test]
fn never_policy_keeps_gapped_venue_out() {
    let mut s = shard(5, ResyncPolicy::Never);
    apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 10)]).with_seq(1), 0);
    apply(&mut s, delta(1, MS, &[]).with_seq(3), MS);
    assert!(ladder(&s, Side::Bid).is_empty());

    let snapshot = delta(1, 2 * MS, &[LevelUpdate::bid(100, 8)]).with_seq(4).replacing(true, true);
    apply(&mut s, snapshot, 2 * MS);
    assert!(ladder(&s, Side::Bid).is_empty());
    assert_eq!(s.symbol("AAPL").unwrap().venue(Venue(1)).unwrap().level(Side::Bid, 100), 8);
}

#[test]
fn heartbeat_after_min_emit_interval() {
    let mut s = shard(5, ResyncPolicy::OnReplace);
    let out = apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 10)]), 0);
    assert_eq!(books(&out).len(), 1);

    let mut out = Vec::new();
    for t in [1, 5, 9] {
        s.on_tick(t * MS, &mut out);
    }
    assert!(books(&out).is_empty());

    // a delta that changes nothing visible is conflated too
    assert!(books(&apply(&mut s, delta(1, 9 * MS, &[LevelUpdate::bid(100, 10)]), 9 * MS)).is_empty());

    s.on_tick(10 * MS, &mut out);
    let emitted = books(&out);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].bids, vec![AggLevel::new(100, 10)]);
    assert_eq!(emitted[0].publish_ts, 10 * MS);

    out.clear();
    s.on_tick(15 * MS, &mut out);
    assert!(books(&out).is_empty());
}

#[test]
fn crossed_market_is_flagged() {
    let mut s = shard(5, ResyncPolicy::OnReplace);
    apply(&mut s, delta(1, 0, &[LevelUpdate::bid(100, 1), LevelUpdate::ask(102, 1)]), 0);
    let out = apply(&mut s, delta(2, MS, &[LevelUpdate::bid(103, 1)]), MS);
    assert!(books(&out)[0].crossed_or_locked);
}
