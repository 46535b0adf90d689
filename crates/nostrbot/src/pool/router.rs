use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use super::RawEvent;

/// Ids remembered per subscription for cross-relay de-duplication
const SEEN_CAPACITY: usize = 10_000;

/// Routing table from subscription id to its subscriber.
///
/// Delivery never waits on a subscriber: when a subscriber's buffer is full
/// the event is dropped for that subscriber only, so one slow bot cannot
/// hold up the shared notification reader.
pub(super) struct Router {
    routes: Mutex<HashMap<String, Route>>,
}

struct Route {
    tx: mpsc::Sender<RawEvent>,
    seen: HashSet<String>,
    /// Relays that have finished sending stored events
    done: HashSet<String>,
    relays: usize,
    live: bool,
}

impl Router {
    pub(super) fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscription expecting stored results from `relays` relays.
    pub(super) async fn open(
        &self,
        id: impl Into<String>,
        live: bool,
        relays: usize,
        buffer: usize,
    ) -> mpsc::Receiver<RawEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        self.routes.lock().await.insert(
            id.into(),
            Route {
                tx,
                seen: HashSet::new(),
                done: HashSet::new(),
                relays,
                live,
            },
        );
        rx
    }

    /// Hand an event to its subscriber, once per event id.
    pub(super) async fn route(&self, id: &str, event: RawEvent) {
        let mut routes = self.routes.lock().await;
        let Some(route) = routes.get_mut(id) else {
            return;
        };

        if let Some(event_id) = event.get("id").and_then(Value::as_str) {
            if route.seen.len() >= SEEN_CAPACITY {
                route.seen.clear();
            }
            if !route.seen.insert(event_id.to_string()) {
                return;
            }
        }

        match route.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscription = %id, "subscriber is behind, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                routes.remove(id);
            }
        }
    }

    /// Record that `relay` sent all its stored events for `id`.
    ///
    /// Returns `true` when this ended a non-live subscription; its stream is
    /// closed and the caller should close it upstream.
    pub(super) async fn end_of_stored(&self, id: &str, relay: &str) -> bool {
        let mut routes = self.routes.lock().await;
        let finished = match routes.get_mut(id) {
            Some(route) => {
                route.done.insert(relay.to_string());
                !route.live && route.done.len() >= route.relays
            }
            None => false,
        };
        if finished {
            routes.remove(id);
        }
        finished
    }

    /// Forget a subscription. Returns whether it was still open.
    pub(super) async fn remove(&self, id: &str) -> bool {
        self.routes.lock().await.remove(id).is_some()
    }

    /// End every stream. Returns how many were open.
    pub(super) async fn clear(&self) -> usize {
        let mut routes = self.routes.lock().await;
        let open = routes.len();
        routes.clear();
        open
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let router = Router::new();
        let mut rx = router.open("sub", true, 2, 8).await;

        router.route("sub", json!({"id": "aa", "content": "one"})).await;
        router.route("sub", json!({"id": "aa", "content": "one"})).await;
        router.route("sub", json!({"id": "bb", "content": "two"})).await;

        assert_eq!(rx.recv().await.unwrap()["id"], "aa");
        assert_eq!(rx.recv().await.unwrap()["id"], "bb");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let router = Router::new();
        let _slow = router.open("slow", true, 1, 1).await;
        let mut fast = router.open("fast", true, 1, 8).await;

        // The slow subscriber never reads; its second event must not wait
        for n in 0..3 {
            router.route("slow", json!({"id": format!("s{n}")})).await;
        }
        router.route("fast", json!({"id": "f0"})).await;

        assert_eq!(fast.recv().await.unwrap()["id"], "f0");
    }

    #[tokio::test]
    async fn test_stored_stream_ends_after_every_relay() {
        let router = Router::new();
        let mut rx = router.open("sub", false, 2, 8).await;

        router.route("sub", json!({"id": "aa"})).await;
        assert!(!router.end_of_stored("sub", "wss://a").await);
        // same relay twice does not count as the second
        assert!(!router.end_of_stored("sub", "wss://a").await);
        assert!(router.end_of_stored("sub", "wss://b").await);

        assert_eq!(rx.recv().await.unwrap()["id"], "aa");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_live_stream_survives_end_of_stored() {
        let router = Router::new();
        let mut rx = router.open("sub", true, 1, 8).await;

        assert!(!router.end_of_stored("sub", "wss://a").await);
        router.route("sub", json!({"id": "aa"})).await;
        assert_eq!(rx.recv().await.unwrap()["id"], "aa");
    }

    #[tokio::test]
    async fn test_clear_ends_streams() {
        let router = Router::new();
        let mut a = router.open("a", true, 1, 8).await;
        let mut b = router.open("b", false, 1, 8).await;

        assert_eq!(router.clear().await, 2);
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(!router.remove("a").await);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_forgotten() {
        let router = Router::new();
        drop(router.open("gone", true, 1, 8).await);

        router.route("gone", json!({"id": "aa"})).await;
        assert!(!router.remove("gone").await);
    }
}
