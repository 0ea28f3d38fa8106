use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::egress::hub::ClientHandle;
use crate::engine::types::AggEvent;

/// Forwards at most one event per interval, always the most recent one.
///
/// An event held back by the interval is released once the interval elapses,
/// even if nothing newer arrives. Without an interval events pass straight through.
#[derive(Debug)]
pub struct ConflatingReceiver {
    client: ClientHandle,
    interval: Option<Duration>,
    held: Option<AggEvent>,
    last_sent: Option<Instant>,
}

impl ConflatingReceiver {
    pub fn new(client: ClientHandle, interval: Option<Duration>) -> Self {
        Self { client, interval: interval.filter(|d| !d.is_zero()), held: None, last_sent: None }
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub async fn recv(&mut self) -> Option<AggEvent> {
        let Some(interval) = self.interval else {
            return self.client.recv().await;
        };
        loop {
            let now = Instant::now();
            let deadline = self.last_sent.map(|t| t + interval);
            if deadline.map_or(true, |d| now >= d) {
                if let Some(event) = self.held.take() {
                    self.last_sent = Some(now);
                    return Some(event);
                }
            }

            let next = match (self.held.is_some(), deadline) {
                (true, Some(deadline)) => tokio::select! {
                    biased;
                    event = self.client.recv() => event,
                    _ = tokio::time::sleep_until(deadline) => continue,
                },
                _ => self.client.recv().await,
            };
            match next {
                Some(event) => self.held = Some(event),
                // closed: flush whatever is still held
                None => return self.held.take(),
            }
        }
    }

    pub async fn recv_or_cancel(&mut self, cancel: &CancellationToken) -> Option<AggEvent> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            event = self.recv() => event,
        }
    }
}
