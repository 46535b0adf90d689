use nostr::{Event, PublicKey};
use serde_json::Value;

use nostrbot_protocol::CommandEnvelope;

use crate::bot::BotContext;
use crate::config::BotConfig;
use crate::rpc::{MethodTable, ReplyDraft, RpcBot};

/// Unencrypted RPC bot answering `ping` with `pong`.
pub fn ping_bot(config: &BotConfig, listen_to: Option<&PublicKey>) -> RpcBot {
    RpcBot::new(config.name.clone(), listen_to, ping_methods())
        .encrypted(false)
        .confirm_replies(config.confirm_replies)
}

pub fn ping_methods() -> MethodTable {
    MethodTable::new()
        .method("ping", on_ping)
        .method("pong", on_pong)
}

async fn on_ping(ctx: BotContext, event: Event, _args: Vec<Value>) -> anyhow::Result<Option<ReplyDraft>> {
    tracing::info!(bot = %ctx.name(), from = %event.pubkey.to_hex(), "got ping, sending pong");
    let pong = CommandEnvelope::new("pong", vec![]);
    Ok(Some(ReplyDraft::command(event.kind.as_u16(), &pong)))
}

async fn on_pong(ctx: BotContext, event: Event, _args: Vec<Value>) -> anyhow::Result<Option<ReplyDraft>> {
    tracing::info!(bot = %ctx.name(), from = %event.pubkey.to_hex(), "got pong");
    Ok(None)
}
