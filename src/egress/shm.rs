//! Publishes aggregated ladders into a shared-memory ring for an out-of-process reader.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

use crate::config::RingConfig;
use crate::egress::hub::ClientHandle;
use crate::egress::EgressPublisher;
use crate::engine::types::AggEvent;
use crate::error::{AggError, AggResult};
use crate::transport::codec::encode_agg_book;
use crate::transport::ring::{self, ShmRingWriter, WriteOutcome, SLOT_PREFIX};

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    timeouts: AtomicU64,
    too_large: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShmEgressStats {
    pub written: u64,
    pub timeouts: u64,
    pub too_large: u64,
}

pub struct ShmEgress {
    config: RingConfig,
    counters: Arc<Counters>,
    unlink_on_shutdown: bool,
}

impl ShmEgress {
    pub fn new(config: RingConfig) -> Self {
        Self { config, counters: Arc::default(), unlink_on_shutdown: false }
    }

    /// Remove the ring file and semaphores on shutdown.
    pub fn unlink_on_shutdown(mut self, yes: bool) -> Self {
        self.unlink_on_shutdown = yes;
        self
    }

    pub fn stats(&self) -> ShmEgressStats {
        ShmEgressStats {
            written: self.counters.written.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            too_large: self.counters.too_large.load(Ordering::Relaxed),
        }
    }
}

// Blocking half: ring waits are semaphore waits, so this runs off the async workers.
fn pump(
    config: RingConfig,
    client: ClientHandle,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    runtime: tokio::runtime::Handle,
) -> AggResult<()> {
    let mut writer = ShmRingWriter::create(&config.dir, &config.name, config.slot_size, config.slot_count)?;
    let timeout = Duration::from_millis(config.write_timeout_ms);
    let mut buf = vec![0u8; writer.geometry().max_payload()];
    let mut receiver = client.into_conflating();

    while let Some(event) = runtime.block_on(receiver.recv_or_cancel(&cancel)) {
        let AggEvent::Book(book) = event else { continue };
        let n = encode_agg_book(&mut buf, &book);
        if n < 0 {
            counters.too_large.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("mdagg_ring_frames_total", "outcome" => WriteOutcome::TooLarge.as_str()).increment(1);
            trace!(symbol = %book.symbol, needed = -n, "ladder exceeds slot, dropped");
            continue;
        }
        match writer.try_write(&buf[..n as usize], Some(timeout))? {
            WriteOutcome::Written => counters.written.fetch_add(1, Ordering::Relaxed),
            WriteOutcome::Timeout => counters.timeouts.fetch_add(1, Ordering::Relaxed),
            WriteOutcome::TooLarge => counters.too_large.fetch_add(1, Ordering::Relaxed),
        };
    }
    Ok(())
}

#[async_trait]
impl EgressPublisher for ShmEgress {
    fn name(&self) -> &str {
        "shm"
    }

    #[instrument(skip_all, fields(ring = %self.config.name, client = client.id()))]
    async fn serve(&mut self, client: ClientHandle, cancel: CancellationToken) -> AggResult<()> {
        if self.config.slot_size <= SLOT_PREFIX {
            return Err(AggError::InvalidConfig(format!("ring.slot_size {} too small", self.config.slot_size)));
        }
        info!(dir = %self.config.dir.display(), slot_size = self.config.slot_size, slot_count = self.config.slot_count, "shm egress serving");
        let config = self.config.clone();
        let counters = self.counters.clone();
        let runtime = tokio::runtime::Handle::current();
        let result = tokio::task::spawn_blocking(move || pump(config, client, cancel, counters, runtime))
            .await
            .map_err(|e| AggError::Io(io::Error::other(e)))?;

        let stats = self.stats();
        info!(written = stats.written, timeouts = stats.timeouts, too_large = stats.too_large, "shm egress stopped");
        result
    }

    async fn shutdown(&mut self) -> AggResult<()> {
        if self.unlink_on_shutdown {
            if let Err(e) = ring::unlink(&self.config.dir, &self.config.name) {
                warn!(ring = %self.config.name, error = %e, "failed to unlink ring");
                return Err(e);
            }
        }
        Ok(())
    }
}
