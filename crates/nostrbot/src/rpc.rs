//! Command/response protocol layered on events.
//!
//! A request is an event whose content is a [`CommandEnvelope`], NIP-04
//! encrypted to the bot when the bot runs encrypted. The method name selects
//! a handler from the bot's [`MethodTable`]; a handler may return a
//! [`ReplyDraft`] which is signed, tagged with the requester and published.
//!
//! Every request moves through decrypt, parse, resolve and handle. A failure
//! at any step is logged once and the request is dropped without a reply.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use nostr::{Event, EventId, PublicKey, Tag};
use serde_json::Value;

use nostrbot_protocol::{CommandEnvelope, EnvelopeError, EventKind};

use crate::bot::{Bot, BotContext, BotError};
use crate::config::{BotConfig, ConfigError};
use crate::identity::CryptoError;
use crate::pool::PublishError;
use crate::query::Interest;

/// Reply payload produced by a handler, before encryption and signing
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyDraft {
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Tag>,
}

impl ReplyDraft {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
        }
    }

    /// A reply that is itself a command, e.g. `pong` for `ping`
    pub fn command(kind: u16, envelope: &CommandEnvelope) -> Self {
        Self::new(kind, envelope.to_json())
    }

    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }
}

#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle a call. `event` is the (verified) request.
    async fn call(
        &self,
        ctx: &BotContext,
        event: &Event,
        args: Vec<Value>,
    ) -> anyhow::Result<Option<ReplyDraft>>;
}

#[async_trait]
impl<F, Fut> RpcHandler for F
where
    F: Fn(BotContext, Event, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<ReplyDraft>>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: &BotContext,
        event: &Event,
        args: Vec<Value>,
    ) -> anyhow::Result<Option<ReplyDraft>> {
        (self)(ctx.clone(), event.clone(), args).await
    }
}

/// Method name to handler, fixed when the bot is built
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn RpcHandler>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>, handler: impl RpcHandler + 'static) -> Self {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RpcHandler>> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Result of a successfully processed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran and had nothing to say
    Handled,
    /// Handler ran and this reply was published
    Replied(EventId),
}

/// Listens for kind 22222 requests by default
pub fn rpc_interest(listen_to: Option<&PublicKey>) -> Interest {
    Interest::default()
        .kind(Some(EventKind::RPC))
        .authors(listen_to.map(|p| vec![p.to_hex()]).unwrap_or_default())
}

pub struct RpcBot {
    name: String,
    interest: Interest,
    encrypted: bool,
    confirm_replies: bool,
    methods: MethodTable,
}

impl RpcBot {
    /// Encrypted bot with confirmed replies, listening to `listen_to`.
    pub fn new(name: impl Into<String>, listen_to: Option<&PublicKey>, methods: MethodTable) -> Self {
        Self {
            name: name.into(),
            interest: rpc_interest(listen_to),
            encrypted: true,
            confirm_replies: true,
            methods,
        }
    }

    pub fn from_config(config: &BotConfig, methods: MethodTable) -> Self {
        Self {
            name: config.name.clone(),
            interest: config.interest.clone(),
            encrypted: config.encrypted,
            confirm_replies: config.confirm_replies,
            methods,
        }
    }

    pub fn with_interest(mut self, interest: Interest) -> Self {
        self.interest = interest;
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn confirm_replies(mut self, confirm: bool) -> Self {
        self.confirm_replies = confirm;
        self
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Decrypt (when encrypted) and parse the request content.
    pub fn decode(&self, ctx: &BotContext, event: &Event) -> Result<CommandEnvelope, RpcError> {
        let content = if self.encrypted {
            ctx.identity()?
                .decrypt(&event.pubkey, &event.content)
                .map_err(RpcError::Decrypt)?
        } else {
            event.content.clone()
        };
        Ok(CommandEnvelope::parse(&content)?)
    }

    /// Run one request through decode, resolve, handle and reply.
    pub async fn dispatch(&self, ctx: &BotContext, event: &Event) -> Result<Outcome, RpcError> {
        let envelope = self.decode(ctx, event)?;
        let handler = self
            .methods
            .get(&envelope.method)
            .ok_or_else(|| RpcError::UnknownMethod(envelope.method.clone()))?;

        tracing::debug!(
            bot = %self.name,
            method = %envelope.method,
            from = %event.pubkey.to_hex(),
            "command"
        );

        let reply = handler
            .call(ctx, event, envelope.args)
            .await
            .map_err(|e| RpcError::Handler {
                method: envelope.method.clone(),
                error: format!("{:#}", e),
            })?;

        let Some(draft) = reply else {
            return Ok(Outcome::Handled);
        };

        let response = self.make_response(ctx, event, draft)?;
        ctx.send(&response, self.confirm_replies)
            .await
            .map_err(RpcError::Delivery)?;
        Ok(Outcome::Replied(response.id))
    }

    /// Sign a reply to `request`: tagged with the requester and, when
    /// encrypted, readable only by them.
    pub fn make_response(
        &self,
        ctx: &BotContext,
        request: &Event,
        draft: ReplyDraft,
    ) -> Result<Event, RpcError> {
        let recipient = request.pubkey;
        let mut tags = draft.tags;
        tags.push(Tag::public_key(recipient));

        let encrypt_to = self.encrypted.then_some(&recipient);
        ctx.make_event(draft.kind, draft.content, tags, encrypt_to)
            .map_err(RpcError::Reply)
    }
}

#[async_trait]
impl Bot for RpcBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> &Interest {
        &self.interest
    }

    async fn handle_event(&mut self, ctx: &BotContext, event: Event) -> anyhow::Result<()> {
        match self.dispatch(ctx, &event).await {
            Ok(Outcome::Handled) => Ok(()),
            Ok(Outcome::Replied(id)) => {
                tracing::debug!(bot = %self.name, reply_id = %id.to_hex(), "replied");
                Ok(())
            }
            Err(e @ RpcError::Delivery(_)) => Err(e.into()),
            Err(e) => {
                tracing::error!(
                    bot = %self.name,
                    event_id = %event.id.to_hex(),
                    error = %e,
                    "dropped request"
                );
                Ok(())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Identity(#[from] ConfigError),
    #[error("could not decrypt request: {0}")]
    Decrypt(#[source] CryptoError),
    #[error("bad command envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("handler for {method} failed: {error}")]
    Handler { method: String, error: String },
    #[error("could not build reply: {0}")]
    Reply(#[source] BotError),
    #[error("reply not delivered: {0}")]
    Delivery(#[source] PublishError),
}
