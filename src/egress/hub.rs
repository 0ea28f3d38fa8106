//! Fan-out of the canonical event stream into independent per-client queues.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{AggConfig, EgressConfig};
use crate::egress::conflate::ConflatingReceiver;
use crate::egress::queue::{BoundedQueue, OverflowPolicy};
use crate::engine::types::AggEvent;

/// Per-client backpressure settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPolicy {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub conflate: Option<Duration>,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self { capacity: 4_096, overflow: OverflowPolicy::DropOldest, conflate: None }
    }
}

impl From<&EgressConfig> for ClientPolicy {
    fn from(cfg: &EgressConfig) -> Self {
        Self {
            capacity: cfg.client_queue_capacity,
            overflow: cfg.overflow,
            conflate: cfg.conflate_interval_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        }
    }
}

impl From<&AggConfig> for ClientPolicy {
    fn from(cfg: &AggConfig) -> Self {
        Self::from(&cfg.egress)
    }
}

type ClientMap = AHashMap<u64, Arc<BoundedQueue<AggEvent>>>;

#[derive(Debug)]
struct HubInner {
    policy: ClientPolicy,
    clients: RwLock<ClientMap>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Explicit hub value; clones share the same registrations.
#[derive(Debug, Clone)]
pub struct EgressHub {
    inner: Arc<HubInner>,
}

impl EgressHub {
    pub fn new(policy: ClientPolicy) -> Self {
        Self {
            inner: Arc::new(HubInner {
                policy,
                clients: RwLock::new(AHashMap::new()),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn policy(&self) -> ClientPolicy {
        self.inner.policy
    }

    pub fn register(&self) -> ClientHandle {
        self.register_with(self.inner.policy)
    }

    /// New client; it sees only events published after this call.
    pub fn register_with(&self, policy: ClientPolicy) -> ClientHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(BoundedQueue::new("client", policy.capacity, policy.overflow));
        if self.inner.shut_down.load(Ordering::Acquire) {
            queue.close();
        } else {
            self.inner.clients.write().insert(id, queue.clone());
            debug!(client = id, ?policy, "client registered");
        }
        ClientHandle { id, policy, queue, hub: Arc::downgrade(&self.inner) }
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// Offer `event` to every registered client. Returns how many clients were offered it.
    pub fn publish(&self, event: &AggEvent) -> usize {
        let clients = self.inner.clients.read();
        for queue in clients.values() {
            queue.push(event.clone());
        }
        clients.len()
    }

    /// Broadcast loop: drain `source` until it completes or `cancel` fires, then shut down.
    #[instrument(name = "egress_hub", skip_all)]
    pub async fn run(&self, source: Arc<BoundedQueue<AggEvent>>, cancel: CancellationToken) {
        info!("egress hub running");
        let mut published = 0u64;
        while let Some(event) = source.recv_or_cancel(&cancel).await {
            self.publish(&event);
            published += 1;
        }
        info!(published, "egress hub stopping");
        self.shutdown();
    }

    /// Close every client queue and refuse new registrations.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let clients = std::mem::take(&mut *self.inner.clients.write());
        for queue in clients.values() {
            queue.close();
        }
    }
}

/// One subscriber's end of the hub. Dropping it unregisters the client.
pub struct ClientHandle {
    id: u64,
    policy: ClientPolicy,
    queue: Arc<BoundedQueue<AggEvent>>,
    hub: Weak<HubInner>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn policy(&self) -> ClientPolicy {
        self.policy
    }

    pub async fn recv(&self) -> Option<AggEvent> {
        self.queue.recv().await
    }

    pub async fn recv_or_cancel(&self, cancel: &CancellationToken) -> Option<AggEvent> {
        self.queue.recv_or_cancel(cancel).await
    }

    pub fn try_recv(&self) -> Option<AggEvent> {
        self.queue.try_pop()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Events lost to this client's overflow policy.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Wrap in a receiver applying this client's conflation interval.
    pub fn into_conflating(self) -> ConflatingReceiver {
        let interval = self.policy.conflate;
        ConflatingReceiver::new(self, interval)
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.clients.write().remove(&self.id);
            debug!(client = self.id, dropped = self.queue.dropped(), "client unregistered");
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle").field("id", &self.id).field("policy", &self.policy).finish()
    }
}
