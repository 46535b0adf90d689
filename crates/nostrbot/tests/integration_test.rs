//! End-to-end tests for bots running under the scheduler
//!
//! Bots run against an in-memory relay pool and cover:
//! - ping/pong over the command protocol
//! - requests dropped on decrypt, envelope and method errors
//! - handler failures not stopping the loop
//! - invalid signatures never reaching handlers
//! - several bots sharing one connection

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use nostr::Event;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nostrbot::agents::{ping_bot, ping_methods};
use nostrbot::config::BotConfig;
use nostrbot::identity::Identity;
use nostrbot::pool::MemoryPool;
use nostrbot::rpc::{MethodTable, ReplyDraft, RpcBot};
use nostrbot::scheduler::{BotEntry, RunReport, Scheduler};
use nostrbot::BotContext;
use nostrbot_protocol::{CommandEnvelope, EventKind};

use common::{fixed_factory, published, tag_values, ErrorCounter};

const PING: &str = r#"{"method":"ping","args":[]}"#;
const PONG: &str = r#"{"method":"pong","args":[]}"#;

struct Harness {
    pool: Arc<MemoryPool>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<RunReport>,
}

impl Harness {
    /// Run `entries` on one shared in-memory relay and wait until they are
    /// all subscribed.
    async fn start(entries: Vec<BotEntry>) -> Self {
        let pool = Arc::new(MemoryPool::new(vec!["memory://relay".to_string()]));
        let (factory, _) = fixed_factory(pool.clone());
        let cancel = CancellationToken::new();

        let count = entries.len();
        let mut scheduler = Scheduler::new(cancel.clone())
            .pool_factory(factory)
            .shared_relays(vec!["memory://relay".to_string()]);
        for entry in entries {
            scheduler.add(entry);
        }

        let handle = tokio::spawn(scheduler.run());
        pool.wait_for_subscriptions(count).await;
        Self {
            pool,
            cancel,
            handle,
        }
    }

    async fn stop(self) -> RunReport {
        self.cancel.cancel();
        self.handle.await.unwrap()
    }
}

fn entry(bot: RpcBot, identity: Identity) -> BotEntry {
    BotEntry::new(Box::new(bot), Some(identity), vec![])
}

fn request(client: &Identity, content: &str) -> Event {
    client
        .sign(EventKind::RPC, content.to_string(), vec![])
        .unwrap()
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let bot_id = Identity::generate();
    let client = Identity::generate();
    let bot = ping_bot(&BotConfig::new("ping"), Some(&client.public_key()));

    let harness = Harness::start(vec![entry(bot, bot_id.clone())]).await;
    harness.pool.inject_event(&request(&client, PING)).await;

    let replies = published(&harness.pool, 1).await;
    let pong = &replies[0];
    assert_eq!(pong.content, PONG);
    assert_eq!(pong.kind.as_u16(), EventKind::RPC);
    assert_eq!(pong.pubkey, bot_id.public_key());
    assert!(pong.verify().is_ok());
    assert_eq!(tag_values(pong, "p"), vec![client.public_key().to_hex()]);

    let report = harness.stop().await;
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_undecryptable_request_is_dropped() {
    let (errors, _guard) = ErrorCounter::install();
    let bot_id = Identity::generate();
    let client = Identity::generate();
    let bot = RpcBot::new("rpc", Some(&client.public_key()), ping_methods());

    let harness = Harness::start(vec![entry(bot, bot_id.clone())]).await;

    // plaintext where ciphertext is expected
    harness.pool.inject_event(&request(&client, PING)).await;
    let ciphertext = client.encrypt(&bot_id.public_key(), PING).unwrap();
    harness.pool.inject_event(&request(&client, &ciphertext)).await;

    let replies = published(&harness.pool, 1).await;
    let plain = client.decrypt(&bot_id.public_key(), &replies[0].content).unwrap();
    assert_eq!(plain, PONG);

    let pool = harness.pool.clone();
    harness.stop().await;
    assert_eq!(pool.published().await.len(), 1);
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn test_unknown_method_is_dropped() {
    let (errors, _guard) = ErrorCounter::install();
    let client = Identity::generate();
    let bot = ping_bot(&BotConfig::new("ping"), Some(&client.public_key()));

    let harness = Harness::start(vec![entry(bot, Identity::generate())]).await;
    harness
        .pool
        .inject_event(&request(&client, r#"{"method":"unknown_thing","args":[]}"#))
        .await;
    harness.pool.inject_event(&request(&client, PING)).await;

    let replies = published(&harness.pool, 1).await;
    assert_eq!(replies[0].content, PONG);

    let pool = harness.pool.clone();
    harness.stop().await;
    assert_eq!(pool.published().await.len(), 1);
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn test_handler_error_does_not_stop_dispatch() {
    let (errors, _guard) = ErrorCounter::install();
    let client = Identity::generate();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

    let seen = seen_tx.clone();
    let methods = MethodTable::new()
        .method("fail", move |_ctx: BotContext, _event: Event, args: Vec<Value>| {
            let seen = seen.clone();
            async move {
                let _ = seen.send(format!("fail {}", args.len()));
                Err::<Option<ReplyDraft>, _>(anyhow::anyhow!("handler exploded"))
            }
        })
        .method("note", move |_ctx: BotContext, _event: Event, args: Vec<Value>| {
            let seen = seen_tx.clone();
            async move {
                let _ = seen.send(format!("note {}", args.len()));
                Ok(None)
            }
        });
    let bot = RpcBot::new("rpc", Some(&client.public_key()), methods).encrypted(false);

    let harness = Harness::start(vec![entry(bot, Identity::generate())]).await;
    for content in [
        json!({"method": "fail", "args": [1]}),
        json!({"method": "note", "args": [1, "two"]}),
        json!({"method": "fail", "args": []}),
        json!({"method": "note", "args": []}),
    ] {
        harness
            .pool
            .inject_event(&request(&client, &content.to_string()))
            .await;
    }

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(seen_rx.recv().await.unwrap());
    }
    assert_eq!(order, vec!["fail 1", "note 2", "fail 0", "note 0"]);

    let report = harness.stop().await;
    assert!(report.is_clean());
    assert_eq!(errors.count(), 2);
}

#[tokio::test]
async fn test_invalid_signature_never_reaches_handler() {
    let client = Identity::generate();
    let bot = ping_bot(&BotConfig::new("ping"), Some(&client.public_key()));

    let harness = Harness::start(vec![entry(bot, Identity::generate())]).await;

    let mut forged = serde_json::to_value(request(&client, r#"{"method":"pong","args":[]}"#)).unwrap();
    forged["content"] = json!(PING);
    harness.pool.inject(forged).await;
    harness
        .pool
        .inject(json!({"id": "00", "pubkey": client.public_key().to_hex(), "kind": 22222, "content": PING}))
        .await;
    let valid = request(&client, PING);
    harness.pool.inject_event(&valid).await;

    let replies = published(&harness.pool, 1).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(tag_values(&replies[0], "p"), vec![client.public_key().to_hex()]);

    let pool = harness.pool.clone();
    harness.stop().await;
    assert_eq!(pool.published().await.len(), 1);
}

#[tokio::test]
async fn test_shared_relays_use_one_connection() {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let pool = Arc::new(MemoryPool::new(vec!["memory://relay".to_string()]));
    let (factory, created) = fixed_factory(pool.clone());
    let cancel = CancellationToken::new();

    let mut scheduler = Scheduler::new(cancel.clone())
        .pool_factory(factory)
        .shared_relays(vec!["memory://relay".to_string()]);
    let alice_bot = ping_bot(&BotConfig::new("ping-alice"), Some(&alice.public_key()));
    let bob_bot = ping_bot(&BotConfig::new("ping-bob"), Some(&bob.public_key()));
    let alice_bot_id = Identity::generate();
    let bob_bot_id = Identity::generate();
    scheduler.add(BotEntry::new(Box::new(alice_bot), Some(alice_bot_id.clone()), vec![]));
    scheduler.add(BotEntry::new(Box::new(bob_bot), Some(bob_bot_id.clone()), vec![]));

    let handle = tokio::spawn(scheduler.run());
    pool.wait_for_subscriptions(2).await;

    pool.inject_event(&request(&alice, PING)).await;
    pool.inject_event(&request(&bob, PING)).await;

    let replies = published(&pool, 2).await;
    let mut pairs: Vec<(String, String)> = replies
        .iter()
        .map(|e| (e.pubkey.to_hex(), tag_values(e, "p")[0].clone()))
        .collect();
    pairs.sort();
    let mut expected = vec![
        (alice_bot_id.public_key().to_hex(), alice.public_key().to_hex()),
        (bob_bot_id.public_key().to_hex(), bob.public_key().to_hex()),
    ];
    expected.sort();
    assert_eq!(pairs, expected);

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(pool.connections(), 1);

    cancel.cancel();
    let report = handle.await.unwrap();
    assert_eq!(report.exits.len(), 2);
    assert!(report.is_clean());
}

#[test]
fn test_envelope_survives_encryption() {
    let sender = Identity::generate();
    let recipient = Identity::generate();
    let envelope = CommandEnvelope::new("ping", vec![]);

    let ciphertext = sender
        .encrypt(&recipient.public_key(), &envelope.to_json())
        .unwrap();
    let plain = recipient.decrypt(&sender.public_key(), &ciphertext).unwrap();
    assert_eq!(CommandEnvelope::parse(&plain).unwrap(), envelope);
}
