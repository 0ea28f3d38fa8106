// Walk through NBBO selection with hand-made quotes: best price, tie-break, lock, staleness
// Run with: cargo run --example nbbo_demo

use mdagg_rs::engine::nbbo::{NbboEngine, NbboParams};
use mdagg_rs::engine::types::{AggNbbo, L1Quote, Nanos, NbboSide, Venue};
use mdagg_rs::market_data::normaliser::TickScale;

const MS: Nanos = 1_000_000;

fn quote(venue: u16, ts: Nanos, bid: (&str, i32), ask: (&str, i32), scale: TickScale) -> L1Quote {
    L1Quote {
        symbol: "MSFT".into(),
        venue: Venue(venue),
        event_ts: ts,
        receive_ts: ts,
        bid_px: scale.to_ticks(bid.0).unwrap_or_default(),
        bid_sz: bid.1,
        ask_px: scale.to_ticks(ask.0).unwrap_or_default(),
        ask_sz: ask.1,
    }
}

fn show(label: &str, nbbo: Option<AggNbbo>, scale: TickScale) {
    let side = |s: Option<NbboSide>| s.map(|s| format!("{}@{} ({})", s.size, scale.format(s.price), s.venue)).unwrap_or_else(|| "-".into());
    match nbbo {
        Some(n) => println!(
            "{label:<28} bid {:<22} ask {:<22}{}",
            side(n.best_bid),
            side(n.best_ask),
            if n.crossed_or_locked { " LOCKED/CROSSED" } else { "" }
        ),
        None => println!("{label:<28} (no change, conflated)"),
    }
}

fn main() {
    let scale = TickScale::new(100);
    let mut engine = NbboEngine::new(NbboParams { stale_after_ns: 250 * MS, min_emit_ns: 5 * MS });

    show("V1 opens", engine.on_quote(quote(1, 0, ("410.10", 5), ("410.14", 5), scale), 0), scale);
    show("V2 improves the bid", engine.on_quote(quote(2, MS, ("410.11", 2), ("410.15", 1), scale), MS), scale);
    show("V1 repeats itself", engine.on_quote(quote(1, 2 * MS, ("410.10", 5), ("410.14", 5), scale), 2 * MS), scale);
    show("V3 ties V2, newer", engine.on_quote(quote(3, 10 * MS, ("410.11", 9), ("410.16", 1), scale), 10 * MS), scale);
    show("V3 locks the market", engine.on_quote(quote(3, 20 * MS, ("410.14", 1), ("410.16", 1), scale), 20 * MS), scale);
    show("V1 alone after 300ms", engine.on_quote(quote(1, 300 * MS, ("410.09", 4), ("410.13", 4), scale), 300 * MS), scale);
}
