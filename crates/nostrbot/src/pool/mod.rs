//! Relay pools: the connection to the event network that bots read from and
//! publish to.
//!
//! A pool may be owned by a single bot or shared by several bots through the
//! scheduler. Subscriptions are independent, so readers need no coordination.

mod client;
mod memory;
mod router;

pub use client::ClientPool;
pub use memory::MemoryPool;

use async_trait::async_trait;
use nostr::{Event, Filter};
use serde_json::Value;
use tokio::sync::mpsc;

/// An event as it came off the wire, before verification.
pub type RawEvent = Value;

#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Relay URLs this pool talks to
    fn relays(&self) -> Vec<String>;

    /// Open connections. Calling this on a connected pool is a no-op.
    async fn connect(&self) -> Result<(), PoolError>;

    /// Open a subscription. With `live` the stream stays open for new events
    /// after the stored ones; without it the stream ends once every relay has
    /// sent its stored results.
    async fn subscribe(&self, filter: Filter, live: bool) -> Result<Subscription, PoolError>;

    /// Publish an event. With `confirm` this waits for a relay to accept it
    /// and reports rejection; without it the event is only queued.
    async fn publish(&self, event: &Event, confirm: bool) -> Result<(), PublishError>;

    /// Close every subscription and connection.
    async fn close(&self);
}

/// A stream of raw events for one subscription.
///
/// The stream ends when the pool drops its side: end of stored events for a
/// non-live subscription, shutdown of the underlying client, or pool close.
/// Dropping the subscription asks the pool to close it upstream.
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<RawEvent>,
    on_drop: Option<mpsc::UnboundedSender<String>>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, rx: mpsc::Receiver<RawEvent>) -> Self {
        Self {
            id: id.into(),
            rx,
            on_drop: None,
        }
    }

    /// Notify `closer` with this subscription's id when it is dropped
    pub fn with_closer(mut self, closer: mpsc::UnboundedSender<String>) -> Self {
        self.on_drop = Some(closer);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<RawEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(closer) = self.on_drop.take() {
            let _ = closer.send(self.id.clone());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is not connected")]
    NotConnected,
    #[error("could not connect to any relay: {0}")]
    NoRelays(String),
    #[error("subscription failed: {0}")]
    Subscribe(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("pool is not connected")]
    NotConnected,
    #[error("event rejected: {0}")]
    Rejected(String),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
