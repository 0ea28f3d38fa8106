//! One shard: exclusive owner of the L2 and NBBO state for the symbols routed to it.
//!
//! Only the shard's own task touches its maps. Input arrives through a single
//! bounded queue, so no locks are needed on the aggregation path.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::{EngineConfig, ResyncPolicy};
use crate::egress::queue::BoundedQueue;
use crate::engine::nbbo::{NbboEngine, NbboParams};
use crate::engine::symbol::SymbolAggregateState;
use crate::engine::types::{now_nanos, AggEvent, AggTrade, FeedEvent, Nanos};

fn millis_to_nanos(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX / 1_000_000).saturating_mul(1_000_000)
}

#[derive(Debug)]
pub struct ShardState {
    id: usize,
    depth: usize,
    resync: ResyncPolicy,
    min_emit_ns: i64,
    stale_after_ns: i64,
    symbols: AHashMap<String, SymbolAggregateState>,
    nbbo: NbboEngine,
}

impl ShardState {
    pub fn new(id: usize, cfg: &EngineConfig) -> Self {
        let min_emit_ns = millis_to_nanos(cfg.min_emit_interval_ms);
        let stale_after_ns = millis_to_nanos(cfg.venue_stale_after_ms);
        Self {
            id,
            depth: cfg.depth(),
            resync: cfg.resync,
            min_emit_ns,
            stale_after_ns,
            symbols: AHashMap::new(),
            nbbo: NbboEngine::new(NbboParams { stale_after_ns, min_emit_ns }),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolAggregateState> {
        self.symbols.get(symbol)
    }

    pub fn nbbo(&self) -> &NbboEngine {
        &self.nbbo
    }

    /// Apply one feed event; any resulting output is appended to `out`.
    pub fn process(&mut self, event: FeedEvent, now: Nanos, out: &mut Vec<AggEvent>) {
        match event {
            FeedEvent::Book(delta) => {
                if !self.symbols.contains_key(delta.symbol.as_str()) {
                    debug!(shard = self.id, symbol = %delta.symbol, "new symbol");
                    self.symbols.insert(delta.symbol.clone(), SymbolAggregateState::new(&delta.symbol, self.depth));
                }
                let Some(state) = self.symbols.get_mut(delta.symbol.as_str()) else { return };
                state.expire_stale(now, self.stale_after_ns);
                state.apply_delta(&delta, self.resync);
                if let Some(book) = state.poll_emit(now, self.min_emit_ns) {
                    out.push(AggEvent::Book(book));
                }
            }
            FeedEvent::Quote(quote) => {
                if let Some(nbbo) = self.nbbo.on_quote(quote, now) {
                    out.push(AggEvent::Nbbo(nbbo));
                }
            }
            FeedEvent::Trade(trade) => out.push(AggEvent::Trade(AggTrade {
                symbol: trade.symbol,
                event_ts: trade.event_ts,
                publish_ts: now,
                price: trade.price,
                size: trade.size,
                venue: trade.venue,
            })),
            FeedEvent::Heartbeat { symbol, venue, receive_ts } => {
                if let Some(state) = self.symbols.get_mut(symbol.as_str()) {
                    state.expire_stale(now, self.stale_after_ns);
                    state.touch_venue(venue, receive_ts);
                    if let Some(book) = state.poll_emit(now, self.min_emit_ns) {
                        out.push(AggEvent::Book(book));
                    }
                }
                if let Some(nbbo) = self.nbbo.on_heartbeat(&symbol, venue, receive_ts, now) {
                    out.push(AggEvent::Nbbo(nbbo));
                }
            }
        }
    }

    /// Periodic pass: staleness sweep plus the heartbeat half of the emission gate.
    pub fn on_tick(&mut self, now: Nanos, out: &mut Vec<AggEvent>) {
        for state in self.symbols.values_mut() {
            state.expire_stale(now, self.stale_after_ns);
            if let Some(book) = state.poll_emit(now, self.min_emit_ns) {
                out.push(AggEvent::Book(book));
            }
        }
        let mut nbbos = Vec::new();
        self.nbbo.on_tick(now, &mut nbbos);
        out.extend(nbbos.into_iter().map(AggEvent::Nbbo));
    }

    /// Worker loop: drain `inbox`, sweep every `tick`, publish into `output` until cancelled.
    ///
    /// `tick` should be a fraction of the min emit interval
    /// (`EngineConfig::tick_interval`); heartbeats can lag their due time by one tick.
    #[instrument(name = "shard", skip_all, fields(shard = self.id))]
    pub async fn run(
        mut self,
        inbox: Arc<BoundedQueue<FeedEvent>>,
        output: Arc<BoundedQueue<AggEvent>>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut out = Vec::with_capacity(16);
        debug!(capacity = inbox.capacity(), ?tick, "shard worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.on_tick(now_nanos(), &mut out),
                event = inbox.recv() => match event {
                    Some(event) => self.process(event, now_nanos(), &mut out),
                    None => break,
                },
            }
            for event in out.drain(..) {
                metrics::counter!("mdagg_emitted_total", "kind" => event.kind()).increment(1);
                output.push(event);
            }
        }
        debug!(symbols = self.symbols.len(), "shard worker stopped");
    }
}
