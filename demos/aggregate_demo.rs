// Three simulated venues -> sharded aggregator -> egress hub -> console + shared-memory ring
// Run with: cargo run --example aggregate_demo -- 10
// Tail the ring from another shell: cargo run --bin mdagg -- tail

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mdagg_rs::config::AggConfig;
use mdagg_rs::egress::{ClientPolicy, EgressHub};
use mdagg_rs::engine::types::{now_nanos, AggEvent, BookDelta, FeedEvent, L1Quote, LevelUpdate, TradePrint, Venue};
use mdagg_rs::engine::Aggregator;
use mdagg_rs::market_data::adapters::{ChannelFeed, VenueAdapter};
use mdagg_rs::market_data::normaliser::TickScale;
use mdagg_rs::telemetry;

const SYMBOLS: [(&str, i32); 3] = [("AAPL", 19_000), ("MSFT", 41_000), ("NVDA", 12_000)];
const LEVELS: i32 = 5;

// Random-walk book for one venue; a full replace every 50 steps resyncs after any gap.
async fn simulate_venue(venue: Venue, tx: mpsc::Sender<FeedEvent>, cancel: CancellationToken) {
    let mut rng = StdRng::seed_from_u64(venue.0 as u64);
    let mut mids: Vec<i32> = SYMBOLS.iter().map(|(_, mid)| *mid).collect();
    let mut seq = 0u64;
    let mut step = 0u64;
    let mut tick = tokio::time::interval(Duration::from_millis(2));

    while !cancel.is_cancelled() {
        tick.tick().await;
        step += 1;
        let i = rng.gen_range(0..SYMBOLS.len());
        let symbol = SYMBOLS[i].0;
        mids[i] += rng.gen_range(-1..=1);
        let mid = mids[i];
        let ts = now_nanos();

        // occasional dropped message, to show gap handling
        seq += if rng.gen_bool(0.005) { 2 } else { 1 };
        let delta = if step % 50 == 0 {
            let bids = (1..=LEVELS).map(|d| LevelUpdate::bid(mid - d, rng.gen_range(1..100))).collect::<Vec<_>>();
            let asks = (1..=LEVELS).map(|d| LevelUpdate::ask(mid + d, rng.gen_range(1..100)));
            BookDelta::new(symbol, venue, ts).with_updates(bids.into_iter().chain(asks)).replacing(true, true)
        } else {
            let depth = rng.gen_range(1..=LEVELS);
            let size = rng.gen_range(0..100);
            let update = if rng.gen_bool(0.5) { LevelUpdate::bid(mid - depth, size) } else { LevelUpdate::ask(mid + depth, size) };
            BookDelta::new(symbol, venue, ts).with_updates([update])
        };

        let quote = L1Quote {
            symbol: symbol.into(),
            venue,
            event_ts: ts,
            receive_ts: ts,
            bid_px: mid - 1,
            bid_sz: rng.gen_range(1..50),
            ask_px: mid + 1,
            ask_sz: rng.gen_range(1..50),
        };
        let mut events = vec![FeedEvent::Book(delta.with_seq(seq)), FeedEvent::Quote(quote)];
        if rng.gen_bool(0.05) {
            events.push(FeedEvent::Trade(TradePrint {
                symbol: symbol.into(),
                venue,
                event_ts: ts,
                receive_ts: ts,
                price: mid,
                size: rng.gen_range(1..20),
            }));
        }
        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AggConfig::load(None)?;
    telemetry::init_tracing(&cfg.telemetry.log_filter);
    telemetry::init_metrics(9000)?;

    let seconds: u64 = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(5);
    let cancel = CancellationToken::new();
    let symbols: Vec<String> = SYMBOLS.iter().map(|(s, _)| s.to_string()).collect();

    let mut feeds: Vec<Arc<dyn VenueAdapter>> = Vec::new();
    let mut simulators = Vec::new();
    for id in 1..=3u16 {
        let (feed, tx) = ChannelFeed::channel(format!("sim-{id}"), 1_024);
        feeds.push(Arc::new(feed));
        simulators.push(tokio::spawn(simulate_venue(Venue(id), tx, cancel.clone())));
    }

    let aggregator = Aggregator::new(cfg.engine.clone(), feeds).start(&symbols, cancel.clone());
    let hub = EgressHub::new(ClientPolicy::from(&cfg));
    let hub_task = tokio::spawn({
        let hub = hub.clone();
        let source = aggregator.output();
        let cancel = cancel.clone();
        async move { hub.run(source, cancel).await }
    });

    // console client: conflated to 4 Hz so the terminal stays readable
    let console = hub.register_with(ClientPolicy { conflate: Some(Duration::from_millis(250)), ..hub.policy() });
    let console_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let scale = TickScale::new(100);
            let mut rx = console.into_conflating();
            while let Some(event) = rx.recv_or_cancel(&cancel).await {
                match event {
                    AggEvent::Book(b) => {
                        let best = |l: Option<&mdagg_rs::engine::types::AggLevel>| {
                            l.map(|l| format!("{}@{}", l.size, scale.format(l.price))).unwrap_or_else(|| "-".into())
                        };
                        println!("BOOK {:<5} {} x {} levels={}/{}", b.symbol, best(b.bids.first()), best(b.asks.first()), b.bids.len(), b.asks.len());
                    }
                    AggEvent::Nbbo(n) => println!("NBBO {:<5} {:?} x {:?}", n.symbol, n.best_bid, n.best_ask),
                    AggEvent::Trade(t) => println!("TRADE {:<5} {}@{} {}", t.symbol, t.size, scale.format(t.price), t.venue),
                }
            }
        }
    });

    #[cfg(unix)]
    let shm_task = {
        use mdagg_rs::egress::{EgressPublisher, ShmEgress};
        let client = hub.register();
        let mut shm = ShmEgress::new(cfg.ring.clone()).unlink_on_shutdown(true);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let served = shm.serve(client, cancel).await;
            let stats = shm.stats();
            info!(?stats, "ring egress done");
            served.and(shm.shutdown().await)
        })
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    info!(shard_drops = ?aggregator.shard_dropped(), output_drops = aggregator.output_dropped(), "stopping");
    cancel.cancel();

    for sim in simulators {
        sim.await?;
    }
    aggregator.join().await;
    hub_task.await?;
    console_task.await?;
    #[cfg(unix)]
    shm_task.await??;
    Ok(())
}
