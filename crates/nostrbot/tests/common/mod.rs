#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::subscriber::DefaultGuard;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use nostr::Event;
use nostrbot::pool::{MemoryPool, RelayPool};
use nostrbot::scheduler::PoolFactory;

/// Counts ERROR level events seen by the subscriber it is installed in
#[derive(Clone, Default)]
pub struct ErrorCounter(Arc<AtomicUsize>);

impl ErrorCounter {
    /// Install as the default subscriber for the current thread
    pub fn install() -> (Self, DefaultGuard) {
        let counter = Self::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (counter, guard)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory that always hands out `pool` and counts how often it was asked
pub fn fixed_factory(pool: Arc<MemoryPool>) -> (PoolFactory, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let factory: PoolFactory = Arc::new(move |_relays: Vec<String>| {
        counter.fetch_add(1, Ordering::SeqCst);
        pool.clone() as Arc<dyn RelayPool>
    });
    (factory, calls)
}

/// Wait until `pool` has published `count` events, then return them
pub async fn published(pool: &MemoryPool, count: usize) -> Vec<Event> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = pool.published().await;
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for published events")
}

pub fn tag_values(event: &Event, name: &str) -> Vec<String> {
    event
        .tags
        .iter()
        .filter_map(|tag| match tag.as_slice() {
            [n, value, ..] if n == name => Some(value.clone()),
            _ => None,
        })
        .collect()
}
