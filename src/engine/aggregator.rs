//! Wires feeds to shards: one task per venue feed, one worker per shard, and a
//! shared output queue carrying every emitted `AggEvent`.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::egress::queue::{BoundedQueue, OverflowPolicy};
use crate::engine::router::ShardRouter;
use crate::engine::shard::ShardState;
use crate::engine::types::{AggEvent, FeedEvent};
use crate::error::AggResult;
use crate::market_data::adapters::VenueAdapter;

pub struct Aggregator {
    config: EngineConfig,
    feeds: Vec<Arc<dyn VenueAdapter>>,
}

impl Aggregator {
    pub fn new(config: EngineConfig, feeds: Vec<Arc<dyn VenueAdapter>>) -> Self {
        Self { config, feeds }
    }

    /// Spawn shard workers and feed tasks on the current runtime.
    #[instrument(skip_all, fields(feeds = self.feeds.len(), symbols = symbols.len()))]
    pub fn start(self, symbols: &[String], cancel: CancellationToken) -> AggregatorHandle {
        let shard_count = self.config.shards();
        let router = Arc::new(ShardRouter::new(shard_count));
        let output = Arc::new(BoundedQueue::new(
            "output",
            self.config.output_queue_capacity,
            OverflowPolicy::DropOldest,
        ));
        let inboxes: Arc<[Arc<BoundedQueue<FeedEvent>>]> = (0..shard_count)
            .map(|_| Arc::new(BoundedQueue::new("shard", self.config.shard_queue_capacity, OverflowPolicy::DropOldest)))
            .collect();

        let mut tasks = Vec::with_capacity(shard_count + self.feeds.len() + 1);
        for (id, inbox) in inboxes.iter().enumerate() {
            let shard = ShardState::new(id, &self.config);
            tasks.push(tokio::spawn(shard.run(
                inbox.clone(),
                output.clone(),
                self.config.tick_interval(),
                cancel.clone(),
            )));
        }

        for feed in &self.feeds {
            let name = feed.name().to_string();
            let events = feed.stream(symbols, cancel.clone());
            tasks.push(tokio::spawn(pump_feed(name, events, router.clone(), inboxes.clone(), cancel.clone())));
        }

        // cancellation completes every queue so consumers drain and exit
        {
            let inboxes = inboxes.clone();
            let output = output.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                cancel.cancelled().await;
                inboxes.iter().for_each(|q| q.close());
                output.close();
            }));
        }

        info!(shards = shard_count, depth = self.config.depth(), "aggregator started");
        AggregatorHandle { router, inboxes, output, tasks, cancel }
    }
}

async fn pump_feed(
    name: String,
    mut events: BoxStream<'static, AggResult<FeedEvent>>,
    router: Arc<ShardRouter>,
    inboxes: Arc<[Arc<BoundedQueue<FeedEvent>>]>,
    cancel: CancellationToken,
) {
    info!(feed = %name, "feed started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = events.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                let shard = router.shard_for(event.symbol());
                inboxes[shard].push(event);
            }
            Some(Err(e)) => {
                // other feeds keep running; this venue ages out through staleness
                error!(feed = %name, error = %e, "feed failed");
                break;
            }
            None => {
                warn!(feed = %name, "feed ended");
                break;
            }
        }
    }
}

pub struct AggregatorHandle {
    router: Arc<ShardRouter>,
    inboxes: Arc<[Arc<BoundedQueue<FeedEvent>>]>,
    output: Arc<BoundedQueue<AggEvent>>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl AggregatorHandle {
    /// The single stream of emitted books, NBBOs and trades.
    pub fn output(&self) -> Arc<BoundedQueue<AggEvent>> {
        self.output.clone()
    }

    pub fn shard_count(&self) -> usize {
        self.router.shard_count()
    }

    pub fn shard_for(&self, symbol: &str) -> usize {
        self.router.shard_for(symbol)
    }

    /// Per-shard inbound drops so far.
    pub fn shard_dropped(&self) -> Vec<u64> {
        self.inboxes.iter().map(|q| q.dropped()).collect()
    }

    pub fn output_dropped(&self) -> u64 {
        self.output.dropped()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel and wait for every task to unwind.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for every task; returns once the token has fired and all tasks exited.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "aggregator task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{AggLevel, BookDelta, LevelUpdate, Venue};
    use crate::market_data::adapters::ChannelFeed;
    use std::time::Duration;

    #[tokio::test]
    async fn routes_feeds_into_one_ladder() {
        let (v1, tx1) = ChannelFeed::channel("v1", 16);
        let (v2, tx2) = ChannelFeed::channel("v2", 16);
        let config = EngineConfig { shard_count: Some(2), min_emit_interval_ms: 1_000, ..EngineConfig::default() };
        let cancel = CancellationToken::new();
        let handle = Aggregator::new(config, vec![Arc::new(v1), Arc::new(v2)]).start(&["AAPL".into()], cancel.clone());
        let output = handle.output();

        let ts = crate::engine::types::now_nanos();
        tx1.send(FeedEvent::Book(BookDelta::new("AAPL", Venue(1), ts).with_updates([LevelUpdate::bid(100, 10)])))
            .await
            .unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), output.recv()).await.unwrap().unwrap();
        assert!(matches!(first, AggEvent::Book(ref b) if b.bids == vec![AggLevel::new(100, 10)]));

        tx2.send(FeedEvent::Book(BookDelta::new("AAPL", Venue(2), ts).with_updates([LevelUpdate::bid(100, 3)])))
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), output.recv()).await.unwrap().unwrap();
        assert!(matches!(second, AggEvent::Book(ref b) if b.bids == vec![AggLevel::new(100, 13)]));

        handle.shutdown().await;
        assert!(output.is_closed());
    }
}
