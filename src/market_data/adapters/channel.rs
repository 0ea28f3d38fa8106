// In-process feed: anything holding the Sender acts as a venue.

use ahash::AHashSet;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::VenueAdapter;
use crate::engine::types::FeedEvent;
use crate::error::{AggError, AggResult};

pub struct ChannelFeed {
    name: String,
    rx: Mutex<Option<mpsc::Receiver<FeedEvent>>>,
}

impl ChannelFeed {
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<FeedEvent>) -> Self {
        Self { name: name.into(), rx: Mutex::new(Some(rx)) }
    }

    /// Feed plus the sender that drives it.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Sender<FeedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(name, rx), tx)
    }
}

impl VenueAdapter for ChannelFeed {
    fn name(&self) -> &str {
        &self.name
    }

    /// Events for symbols outside `symbols` are skipped; an empty list passes everything.
    /// The receiver can be taken once; a second call yields a single error.
    fn stream(&self, symbols: &[String], cancel: CancellationToken) -> BoxStream<'static, AggResult<FeedEvent>> {
        let Some(rx) = self.rx.lock().take() else {
            let err = AggError::feed(&self.name, "stream already taken");
            return stream::once(async move { Err(err) }).boxed();
        };
        let wanted: AHashSet<String> = symbols.iter().cloned().collect();
        debug!(feed = %self.name, symbols = wanted.len(), "channel feed attached");

        stream::unfold((rx, cancel, wanted), |(mut rx, cancel, wanted)| async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    event = rx.recv() => event?,
                };
                if wanted.is_empty() || wanted.contains(event.symbol()) {
                    return Some((Ok(event), (rx, cancel, wanted)));
                }
            }
        })
        .boxed()
    }
}
