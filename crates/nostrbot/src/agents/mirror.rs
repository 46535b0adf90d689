use std::sync::Arc;

use async_trait::async_trait;
use nostr::{Event, Filter, Kind, PublicKey, Timestamp};

use crate::bot::{Bot, BotContext};
use crate::pool::RelayPool;
use crate::query::Interest;
use crate::store::Store;

const LAST_SEEN: &str = "last_seen";

/// Copies everything the owner and the people they follow publish to a
/// target relay.
///
/// Progress (last seen timestamp and mirrored ids) lives in the store, so a
/// restart resumes where it left off. The target pool belongs to the bot and
/// is closed when its run ends.
pub struct MirrorBot {
    name: String,
    interest: Interest,
    owner: PublicKey,
    target: Arc<dyn RelayPool>,
    store: Store,
}

impl MirrorBot {
    pub fn new(name: impl Into<String>, owner: PublicKey, target: Arc<dyn RelayPool>, store: Store) -> Self {
        Self {
            name: name.into(),
            interest: Interest::default().kind(None).authors(vec![owner.to_hex()]),
            owner,
            target,
            store,
        }
    }

    fn last_seen(&self) -> u64 {
        self.store.get(LAST_SEEN).unwrap_or(1)
    }

    /// The owner plus every `p` in the owner's contact lists
    async fn following(&self, ctx: &BotContext) -> anyhow::Result<Vec<PublicKey>> {
        tracing::info!(bot = %self.name, owner = %self.owner.to_hex(), "getting following");

        let contacts = ctx
            .fetch(Filter::new().kind(Kind::ContactList).author(self.owner))
            .await?;

        let mut following = vec![self.owner];
        for event in &contacts {
            for tag in event.tags.iter() {
                let [name, pubkey, ..] = tag.as_slice() else {
                    continue;
                };
                if name != "p" {
                    continue;
                }
                match PublicKey::from_hex(pubkey) {
                    Ok(key) if !following.contains(&key) => following.push(key),
                    Ok(_) => {}
                    Err(_) => tracing::debug!(bot = %self.name, pubkey = %pubkey, "skipping malformed contact"),
                }
            }
        }
        Ok(following)
    }
}

#[async_trait]
impl Bot for MirrorBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> &Interest {
        &self.interest
    }

    async fn query(&mut self, ctx: &BotContext) -> anyhow::Result<Filter> {
        self.target.connect().await?;
        let following = self.following(ctx).await?;
        self.interest = self
            .interest
            .clone()
            .authors(following.iter().map(PublicKey::to_hex).collect());
        Ok(Filter::new()
            .authors(following)
            .since(Timestamp::from(self.last_seen())))
    }

    async fn handle_event(&mut self, _ctx: &BotContext, event: Event) -> anyhow::Result<()> {
        let id = event.id.to_hex();
        if self.store.contains(&id) {
            return Ok(());
        }

        self.target.publish(&event, false).await?;
        tracing::info!(
            bot = %self.name,
            event_id = %&id[..8],
            author = %event.pubkey.to_hex(),
            target = ?self.target.relays(),
            "mirrored"
        );

        let created_at = event.created_at.as_u64();
        if created_at > self.last_seen() {
            self.store.set(LAST_SEEN, &created_at).await?;
        }
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.store.set(id, &now).await?;
        Ok(())
    }

    async fn finish(&mut self, _ctx: &BotContext) {
        self.target.close().await;
    }
}
