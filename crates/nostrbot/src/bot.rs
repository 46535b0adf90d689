use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr::{Event, Filter, PublicKey, Tag};
use tokio_util::sync::CancellationToken;

use nostrbot_protocol::EventKind;

use crate::config::{BotConfig, ConfigError};
use crate::identity::{CryptoError, Identity};
use crate::pool::{PoolError, PublishError, RelayPool};
use crate::query::{build_filter, Interest};
use crate::validator;

/// Upper bound on waiting for stored results in [`BotContext::fetch`]
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Application logic driven by the dispatch loop.
///
/// Implementors only need a name and an interest; the defaults subscribe to
/// that interest and log every event.
#[async_trait]
pub trait Bot: Send {
    fn name(&self) -> &str;

    fn interest(&self) -> &Interest;

    /// Filter for the live subscription. Called once per run.
    async fn query(&mut self, _ctx: &BotContext) -> anyhow::Result<Filter> {
        Ok(build_filter(self.interest()))
    }

    /// Handle one verified event.
    async fn handle_event(&mut self, _ctx: &BotContext, event: Event) -> anyhow::Result<()> {
        tracing::info!(
            bot = %self.name(),
            event_id = %event.id.to_hex(),
            author = %event.pubkey.to_hex(),
            kind = event.kind.as_u16(),
            content = %event.content,
            "event"
        );
        Ok(())
    }

    /// Called once when the dispatch loop exits, whatever the reason.
    async fn finish(&mut self, _ctx: &BotContext) {}
}

/// Everything a bot may use while handling events.
///
/// Cheap to clone; all clones share the same pool and cancellation token.
#[derive(Clone)]
pub struct BotContext {
    name: String,
    identity: Option<Identity>,
    pool: Arc<dyn RelayPool>,
    cancel: CancellationToken,
}

impl BotContext {
    pub fn new(
        name: impl Into<String>,
        identity: Option<Identity>,
        pool: Arc<dyn RelayPool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            identity,
            pool,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bot's identity; bots that only listen may have none.
    pub fn identity(&self) -> Result<&Identity, ConfigError> {
        self.identity
            .as_ref()
            .ok_or_else(|| ConfigError::MissingKey(self.name.clone()))
    }

    pub fn pool(&self) -> &Arc<dyn RelayPool> {
        &self.pool
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sign an event with the bot's key, encrypting `content` to
    /// `encrypt_to` first when given.
    pub fn make_event(
        &self,
        kind: u16,
        content: impl Into<String>,
        tags: Vec<Tag>,
        encrypt_to: Option<&PublicKey>,
    ) -> Result<Event, BotError> {
        let identity = self.identity()?;
        let content = content.into();
        let content = match encrypt_to {
            Some(recipient) => identity.encrypt(recipient, &content)?,
            None => content,
        };
        Ok(identity.sign(kind, content, tags)?)
    }

    /// Encrypted direct message to `recipient`.
    pub fn make_dm(
        &self,
        recipient: &PublicKey,
        content: impl Into<String>,
        mut tags: Vec<Tag>,
    ) -> Result<Event, BotError> {
        tags.push(Tag::public_key(*recipient));
        self.make_event(EventKind::ENCRYPTED_DM, content, tags, Some(recipient))
    }

    /// Publish without waiting for any relay to accept the event.
    pub async fn reply(&self, event: &Event) -> Result<(), PublishError> {
        tracing::debug!(bot = %self.name, event_id = %event.id.to_hex(), "replying");
        self.pool.publish(event, false).await
    }

    pub async fn send(&self, event: &Event, confirm: bool) -> Result<(), PublishError> {
        self.pool.publish(event, confirm).await
    }

    /// Collect the stored events matching `filter`.
    ///
    /// Stops at end of stored results, on timeout, or on cancellation, and
    /// returns whatever verified events arrived by then.
    pub async fn fetch(&self, filter: Filter) -> Result<Vec<Event>, BotError> {
        let mut sub = self.pool.subscribe(filter, false).await?;
        let deadline = tokio::time::Instant::now() + FETCH_TIMEOUT;
        let mut events = Vec::new();

        loop {
            let raw = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = tokio::time::timeout_at(deadline, sub.next()) => match next {
                    Ok(Some(raw)) => raw,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::debug!(bot = %self.name, "fetch timed out");
                        break;
                    }
                },
            };
            if let Some(event) = validator::check(&self.name, &raw) {
                events.push(event);
            }
        }

        Ok(events)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// The plain bot: subscribes to its interest and logs what arrives.
pub struct LogBot {
    name: String,
    interest: Interest,
}

impl LogBot {
    pub fn new(name: impl Into<String>, interest: Interest) -> Self {
        Self {
            name: name.into(),
            interest,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(config.name.clone(), config.interest.clone())
    }
}

#[async_trait]
impl Bot for LogBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> &Interest {
        &self.interest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryPool;

    fn context(identity: Option<Identity>, pool: Arc<MemoryPool>) -> BotContext {
        BotContext::new("test", identity, pool, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_default_query_uses_interest() {
        let mut bot = LogBot::new("logger", Interest::default().kind(Some(7)).limit(Some(3)));
        let ctx = context(None, Arc::new(MemoryPool::new(vec![])));

        let filter = bot.query(&ctx).await.unwrap();
        assert_eq!(filter, Filter::new().limit(3).kind(nostr::Kind::from(7)));
    }

    #[tokio::test]
    async fn test_make_event_requires_identity() {
        let ctx = context(None, Arc::new(MemoryPool::new(vec![])));
        assert!(matches!(
            ctx.make_event(1, "hi", vec![], None),
            Err(BotError::Config(ConfigError::MissingKey(_)))
        ));
    }

    #[tokio::test]
    async fn test_make_dm_encrypts_and_tags_recipient() {
        let identity = Identity::generate();
        let recipient = Identity::generate();
        let ctx = context(Some(identity.clone()), Arc::new(MemoryPool::new(vec![])));

        let dm = ctx.make_dm(&recipient.public_key(), "secret", vec![]).unwrap();
        assert_eq!(dm.kind.as_u16(), EventKind::ENCRYPTED_DM);
        assert_ne!(dm.content, "secret");
        assert!(dm.verify().is_ok());

        let p_tag = dm.tags.iter().next().unwrap().as_slice().to_vec();
        assert_eq!(p_tag, vec!["p".to_string(), recipient.public_key().to_hex()]);
        assert_eq!(
            recipient.decrypt(&identity.public_key(), &dm.content).unwrap(),
            "secret"
        );
    }

    #[tokio::test]
    async fn test_fetch_returns_only_verified_stored_events() {
        let identity = Identity::generate();
        let pool = Arc::new(MemoryPool::new(vec![]));
        pool.connect().await.unwrap();

        let good = identity.sign(0, "{}".to_string(), vec![]).unwrap();
        pool.inject_event(&good).await;
        let mut forged = serde_json::to_value(&good).unwrap();
        forged["content"] = serde_json::json!("{\"name\":\"mallory\"}");
        pool.inject(forged).await;

        let ctx = context(Some(identity.clone()), pool);
        let events = ctx
            .fetch(Filter::new().kind(nostr::Kind::Metadata).author(identity.public_key()))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, good.id);
    }
}
