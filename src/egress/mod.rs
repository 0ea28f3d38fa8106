pub mod conflate;
pub mod hub;
pub mod queue;
#[cfg(unix)]
pub mod shm;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AggResult;

pub use conflate::ConflatingReceiver;
pub use hub::{ClientHandle, ClientPolicy, EgressHub};
pub use queue::{BoundedQueue, OverflowPolicy, PushOutcome};
#[cfg(unix)]
pub use shm::ShmEgress;

/// A transport that serves one hub client until cancelled.
#[async_trait]
pub trait EgressPublisher: Send {
    fn name(&self) -> &str;

    /// Forward the client's events until `cancel` fires or the hub shuts down.
    async fn serve(&mut self, client: ClientHandle, cancel: CancellationToken) -> AggResult<()>;

    /// Release every resource the publisher still holds.
    async fn shutdown(&mut self) -> AggResult<()>;
}
