use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use nostr::{Event, Filter};
use tokio::sync::{mpsc, Mutex, Notify};

use super::{PoolError, PublishError, RawEvent, RelayPool, Subscription};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// In-process relay pool.
///
/// Behaves like a single well-behaved relay: stored events are replayed on
/// subscribe (newest `limit` first-come order), injected and published events
/// go to every matching live subscription, and published events are
/// recorded for inspection.
pub struct MemoryPool {
    relays: Vec<String>,
    state: Mutex<MemoryState>,
    connected: AtomicBool,
    connections: AtomicUsize,
    reject_publishes: AtomicBool,
    subscribed: Notify,
}

#[derive(Default)]
struct MemoryState {
    stored: Vec<RawEvent>,
    published: Vec<Event>,
    subscriptions: Vec<MemorySubscription>,
}

struct MemorySubscription {
    filter: Filter,
    tx: mpsc::Sender<RawEvent>,
}

impl MemoryPool {
    pub fn new(relays: Vec<String>) -> Self {
        Self {
            relays,
            state: Mutex::new(MemoryState::default()),
            connected: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            reject_publishes: AtomicBool::new(false),
            subscribed: Notify::new(),
        }
    }

    /// How many times a connection was actually established
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make confirmed publishes fail as if the relay said `OK false`
    pub fn reject_publishes(&self, reject: bool) {
        self.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Store an event and deliver it to matching live subscriptions.
    ///
    /// Events that do not parse are delivered to every subscription, so
    /// verification downstream gets to see them.
    pub async fn inject(&self, raw: RawEvent) {
        let mut state = self.state.lock().await;
        let parsed = serde_json::from_value::<Event>(raw.clone()).ok();

        state.subscriptions.retain(|sub| !sub.tx.is_closed());
        for sub in &state.subscriptions {
            let wanted = parsed.as_ref().is_none_or(|e| sub.filter.match_event(e));
            if wanted {
                let _ = sub.tx.try_send(raw.clone());
            }
        }
        state.stored.push(raw);
    }

    /// Inject a signed event
    pub async fn inject_event(&self, event: &Event) {
        if let Ok(raw) = serde_json::to_value(event) {
            self.inject(raw).await;
        }
    }

    /// Events published through this pool, in order
    pub async fn published(&self) -> Vec<Event> {
        self.state.lock().await.published.clone()
    }

    pub async fn subscription_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscriptions.retain(|sub| !sub.tx.is_closed());
        state.subscriptions.len()
    }

    /// Wait until at least `count` live subscriptions are open.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        loop {
            let notified = self.subscribed.notified();
            if self.subscription_count().await >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RelayPool for MemoryPool {
    fn relays(&self) -> Vec<String> {
        self.relays.clone()
    }

    async fn connect(&self) -> Result<(), PoolError> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connections.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(relays = ?self.relays, "memory pool connected");
        }
        Ok(())
    }

    async fn subscribe(&self, filter: Filter, live: bool) -> Result<Subscription, PoolError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PoolError::NotConnected);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut state = self.state.lock().await;

        let mut stored: Vec<&RawEvent> = state
            .stored
            .iter()
            .filter(|raw| {
                serde_json::from_value::<Event>((*raw).clone())
                    .is_ok_and(|event| filter.match_event(&event))
            })
            .collect();
        if let Some(limit) = filter.limit {
            let skip = stored.len().saturating_sub(limit);
            stored.drain(..skip);
        }
        for raw in stored {
            let _ = tx.try_send(raw.clone());
        }

        if live {
            state.subscriptions.push(MemorySubscription { filter, tx });
            drop(state);
            self.subscribed.notify_waiters();
        }

        Ok(Subscription::new(uuid::Uuid::new_v4().simple().to_string(), rx))
    }

    async fn publish(&self, event: &Event, confirm: bool) -> Result<(), PublishError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }
        if confirm && self.reject_publishes.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected(format!(
                "{}: blocked",
                self.relays.first().map(String::as_str).unwrap_or("memory")
            )));
        }

        self.state.lock().await.published.push(event.clone());
        self.inject(serde_json::to_value(event)?).await;
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().await.subscriptions.clear();
        self.connected.store(false, Ordering::SeqCst);
    }
}
