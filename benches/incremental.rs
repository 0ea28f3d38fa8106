//! Per-delta cost of the incremental ladder against a full rebuild

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mdagg_rs::config::ResyncPolicy;
use mdagg_rs::engine::ladder::TopLevels;
use mdagg_rs::engine::types::{BookDelta, LevelUpdate, Side, Venue};
use mdagg_rs::engine::SymbolAggregateState;
use mdagg_rs::transport::encode_agg_book;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const VENUES: u16 = 8;
const MID: i32 = 10_000;

fn deltas(count: usize) -> Vec<BookDelta> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|i| {
            let venue = Venue(rng.gen_range(1..=VENUES));
            let offset = rng.gen_range(1..=50);
            let size = if rng.gen_bool(0.2) { 0 } else { rng.gen_range(1..500) };
            let update = if rng.gen_bool(0.5) { LevelUpdate::bid(MID - offset, size) } else { LevelUpdate::ask(MID + offset, size) };
            BookDelta::new("AAPL", venue, i as i64).with_updates([update])
        })
        .collect()
}

// every venue quoting 50 levels a side
fn seeded(depth: usize) -> SymbolAggregateState {
    let mut state = SymbolAggregateState::new("AAPL", depth);
    for v in 1..=VENUES {
        let bids = (1..=50).map(|d| LevelUpdate::bid(MID - d, 100));
        let asks = (1..=50).map(|d| LevelUpdate::ask(MID + d, 100));
        let snapshot = BookDelta::new("AAPL", Venue(v), 0).with_updates(bids.chain(asks)).replacing(true, true);
        state.apply_delta(&snapshot, ResyncPolicy::OnReplace);
    }
    state
}

fn bench_apply_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_delta");
    let input = deltas(10_000);

    for &depth in &[1usize, 10, 64] {
        group.bench_with_input(BenchmarkId::new("incremental", depth), &depth, |b, &depth| {
            let mut state = seeded(depth);
            let mut i = 0;
            b.iter(|| {
                state.apply_delta(black_box(&input[i % input.len()]), ResyncPolicy::OnReplace);
                i += 1;
            });
        });

        group.bench_with_input(BenchmarkId::new("full_rebuild", depth), &depth, |b, &depth| {
            let state = seeded(depth);
            b.iter(|| black_box(TopLevels::from_aggregate(Side::Bid, depth, state.side(Side::Bid).levels())));
        });
    }
    group.finish();
}

fn bench_emit_and_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit");
    let input = deltas(10_000);

    group.bench_function("poll_emit_encode_depth10", |b| {
        let mut state = seeded(10);
        let mut buf = vec![0u8; 2_044];
        let mut now = 1;
        b.iter(|| {
            state.apply_delta(&input[now as usize % input.len()], ResyncPolicy::OnReplace);
            if let Some(book) = state.poll_emit(now, 0) {
                black_box(encode_agg_book(&mut buf, &book));
            }
            now += 1;
        });
    });
    group.finish();
}

criterion_group!(benches, bench_apply_delta, bench_emit_and_encode);
criterion_main!(benches);
