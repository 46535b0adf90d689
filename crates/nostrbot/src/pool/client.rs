use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr::{Event, Filter, RelayMessage, SubscriptionId};
use nostr_sdk::{Client, RelayPoolNotification};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::router::Router;
use super::{PoolError, PublishError, RelayPool, Subscription};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Relay pool backed by a [`nostr_sdk::Client`].
///
/// The client owns the sockets, reconnects and the wire protocol. This type
/// adds what bots need on top: one event stream per subscription, stored
/// queries that end once every relay has sent its stored events, and
/// cross-relay de-duplication.
pub struct ClientPool {
    urls: Vec<String>,
    client: Client,
    router: Arc<Router>,
    connected: Mutex<bool>,
    relay_count: AtomicUsize,
    notifier: Mutex<Option<JoinHandle<()>>>,
    closer_tx: mpsc::UnboundedSender<String>,
    closer_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ClientPool {
    pub fn new(urls: Vec<String>) -> Self {
        let (closer_tx, closer_rx) = mpsc::unbounded_channel();
        Self {
            urls,
            client: Client::default(),
            router: Arc::new(Router::new()),
            connected: Mutex::new(false),
            relay_count: AtomicUsize::new(0),
            notifier: Mutex::new(None),
            closer_tx,
            closer_rx: Mutex::new(Some(closer_rx)),
        }
    }

    async fn is_connected(&self) -> bool {
        *self.connected.lock().await
    }
}

/// Fan relay notifications out to subscriptions until the client shuts down.
async fn route_notifications(
    client: Client,
    router: Arc<Router>,
    mut notifications: broadcast::Receiver<RelayPoolNotification>,
) {
    loop {
        let notification = match notifications.recv().await {
            Ok(notification) => notification,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "notification reader lagged, events were skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match notification {
            RelayPoolNotification::Message { relay_url, message } => {
                handle_message(&client, &router, &relay_url.to_string(), message).await
            }
            // Also surfaced as a message; the router drops the repeat
            RelayPoolNotification::Event {
                subscription_id,
                event,
                ..
            } => route_event(&router, &subscription_id, &event).await,
            RelayPoolNotification::Shutdown => break,
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }

    let open = router.clear().await;
    if open > 0 {
        tracing::warn!(count = open, "relay client shut down, ending subscriptions");
    }
}

async fn handle_message(client: &Client, router: &Router, relay: &str, message: RelayMessage) {
    match message {
        RelayMessage::Event {
            subscription_id,
            event,
        } => route_event(router, &subscription_id, &event).await,
        RelayMessage::EndOfStoredEvents(subscription_id) => {
            end_of_stored(client, router, relay, subscription_id).await
        }
        RelayMessage::Closed {
            subscription_id,
            message,
        } => {
            tracing::warn!(relay = %relay, subscription = %subscription_id, reason = %message, "subscription closed by relay");
            end_of_stored(client, router, relay, subscription_id).await
        }
        RelayMessage::Notice { message } => {
            tracing::info!(relay = %relay, notice = %message, "relay notice");
        }
        _ => {}
    }
}

async fn route_event(router: &Router, subscription_id: &SubscriptionId, event: &Event) {
    match serde_json::to_value(event) {
        Ok(raw) => router.route(&subscription_id.to_string(), raw).await,
        Err(e) => tracing::debug!(error = %e, "could not encode relay event"),
    }
}

async fn end_of_stored(client: &Client, router: &Router, relay: &str, subscription_id: SubscriptionId) {
    if router.end_of_stored(&subscription_id.to_string(), relay).await {
        tracing::debug!(subscription = %subscription_id, "stored events complete");
        client.unsubscribe(subscription_id).await;
    }
}

#[async_trait]
impl RelayPool for ClientPool {
    fn relays(&self) -> Vec<String> {
        self.urls.clone()
    }

    async fn connect(&self) -> Result<(), PoolError> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }

        let mut added = 0;
        let mut failures = Vec::new();
        for url in &self.urls {
            match self.client.add_relay(url.as_str()).await {
                Ok(_) => added += 1,
                Err(e) => {
                    tracing::warn!(relay = %url, error = %e, "skipping relay");
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }
        if added == 0 {
            return Err(PoolError::NoRelays(failures.join("; ")));
        }
        self.relay_count.store(added, Ordering::SeqCst);

        // Subscribe to notifications before any REQ goes out
        let notifications = self.client.notifications();
        let notifier = tokio::spawn(route_notifications(
            self.client.clone(),
            self.router.clone(),
            notifications,
        ));
        if let Some(old) = self.notifier.lock().await.replace(notifier) {
            old.abort();
        }

        if let Some(mut closer_rx) = self.closer_rx.lock().await.take() {
            let client = self.client.clone();
            let router = self.router.clone();
            tokio::spawn(async move {
                while let Some(subscription_id) = closer_rx.recv().await {
                    if router.remove(&subscription_id).await {
                        client.unsubscribe(SubscriptionId::new(subscription_id)).await;
                    }
                }
            });
        }

        self.client.connect_with_timeout(CONNECT_TIMEOUT).await;
        tracing::info!(relays = ?self.urls, "relay pool connected");

        *connected = true;
        Ok(())
    }

    async fn subscribe(&self, filter: Filter, live: bool) -> Result<Subscription, PoolError> {
        if !self.is_connected().await {
            return Err(PoolError::NotConnected);
        }

        let subscription_id = SubscriptionId::generate();
        let id = subscription_id.to_string();
        let rx = self
            .router
            .open(
                id.clone(),
                live,
                self.relay_count.load(Ordering::SeqCst),
                SUBSCRIPTION_BUFFER,
            )
            .await;

        tracing::debug!(subscription = %id, live, "opening subscription");
        if let Err(e) = self
            .client
            .subscribe_with_id(subscription_id, vec![filter], None)
            .await
        {
            self.router.remove(&id).await;
            return Err(PoolError::Subscribe(e.to_string()));
        }

        Ok(Subscription::new(id, rx).with_closer(self.closer_tx.clone()))
    }

    async fn publish(&self, event: &Event, confirm: bool) -> Result<(), PublishError> {
        if !self.is_connected().await {
            return Err(PublishError::NotConnected);
        }

        if !confirm {
            let client = self.client.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let event_id = event.id.to_hex();
                if let Err(e) = client.send_event(event).await {
                    tracing::warn!(event_id = %event_id, error = %e, "publish failed");
                }
            });
            return Ok(());
        }

        match self.client.send_event(event.clone()).await {
            Ok(output) if !output.success.is_empty() => Ok(()),
            Ok(output) => {
                let reasons: Vec<String> = output
                    .failed
                    .iter()
                    .map(|(url, reason)| format!("{}: {:?}", url, reason))
                    .collect();
                Err(PublishError::Rejected(reasons.join("; ")))
            }
            Err(e) => Err(PublishError::Rejected(e.to_string())),
        }
    }

    async fn close(&self) {
        let mut connected = self.connected.lock().await;

        if let Some(notifier) = self.notifier.lock().await.take() {
            notifier.abort();
        }
        self.router.clear().await;
        let _ = self.client.disconnect().await;

        *connected = false;
        tracing::info!(relays = ?self.urls, "relay pool closed");
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use nostr::Kind;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    use super::*;
    use crate::identity::Identity;

    /// Minimal relay: answers REQ with the given stored events + EOSE, and
    /// EVENT with OK(accepted).
    async fn spawn_relay(stored: Vec<Value>, accept: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let stored = stored.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else {
                            continue;
                        };
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        let replies = match frame[0].as_str() {
                            Some("REQ") => {
                                let sub = frame[1].clone();
                                let mut replies: Vec<Value> = stored
                                    .iter()
                                    .map(|event| json!(["EVENT", sub, event]))
                                    .collect();
                                replies.push(json!(["EOSE", sub]));
                                replies
                            }
                            Some("EVENT") => {
                                let reason = if accept { "" } else { "blocked: test" };
                                vec![json!(["OK", frame[1]["id"], accept, reason])]
                            }
                            _ => vec![],
                        };
                        for reply in replies {
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        format!("ws://{}", addr)
    }

    fn note(identity: &Identity, content: &str) -> Event {
        identity.sign(1, content.to_string(), vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_connect_fails_without_usable_relays() {
        let pool = ClientPool::new(vec!["not a relay url".to_string()]);
        assert!(matches!(pool.connect().await, Err(PoolError::NoRelays(_))));
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let identity = Identity::generate();
        let pool = ClientPool::new(vec!["ws://127.0.0.1:1".to_string()]);
        assert!(matches!(
            pool.publish(&note(&identity, "hi"), false).await,
            Err(PublishError::NotConnected)
        ));
        assert!(matches!(
            pool.subscribe(Filter::new(), true).await,
            Err(PoolError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_stored_query_dedupes_across_relays() {
        let identity = Identity::generate();
        let stored = vec![serde_json::to_value(note(&identity, "one")).unwrap()];
        let a = spawn_relay(stored.clone(), true).await;
        let b = spawn_relay(stored, true).await;

        let pool = ClientPool::new(vec![a, b]);
        pool.connect().await.unwrap();
        pool.connect().await.unwrap();

        let mut sub = pool
            .subscribe(Filter::new().kind(Kind::TextNote), false)
            .await
            .unwrap();
        let mut received = Vec::new();
        while let Some(event) = sub.next().await {
            received.push(event);
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["content"], "one");

        pool.close().await;
    }

    #[tokio::test]
    async fn test_publish_with_confirmation() {
        let identity = Identity::generate();

        let url = spawn_relay(vec![], true).await;
        let pool = ClientPool::new(vec![url]);
        pool.connect().await.unwrap();
        pool.publish(&note(&identity, "hi"), true).await.unwrap();

        let url = spawn_relay(vec![], false).await;
        let pool = ClientPool::new(vec![url]);
        pool.connect().await.unwrap();
        let err = pool.publish(&note(&identity, "hi"), true).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected(_)));

        // Fire-and-forget never reports rejection
        pool.publish(&note(&identity, "hi"), false).await.unwrap();
    }
}
