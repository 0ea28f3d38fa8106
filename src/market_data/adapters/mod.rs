// Shared contract for venue feeds. Protocol decoding stays inside each adapter;
// the engine only sees canonical FeedEvents keyed by canonical symbol.

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::engine::types::FeedEvent;
use crate::error::AggResult;

pub trait VenueAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Lazy, unbounded event stream for `symbols`, ending when `cancel` fires.
    /// An `Err` item is terminal for this feed.
    fn stream(&self, symbols: &[String], cancel: CancellationToken) -> BoxStream<'static, AggResult<FeedEvent>>;
}

pub mod channel;

pub use channel::ChannelFeed;
