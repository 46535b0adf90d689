use anyhow::Context;
use async_trait::async_trait;
use nostr::Event;

use nostrbot_protocol::EventKind;

use crate::bot::{Bot, BotContext};
use crate::query::Interest;

use super::profile_name;

/// Watches profile updates and sends itself a welcome DM for each one.
pub struct WelcomeBot {
    name: String,
    interest: Interest,
}

impl WelcomeBot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interest: Interest::default().kind(Some(EventKind::METADATA)),
        }
    }
}

#[async_trait]
impl Bot for WelcomeBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> &Interest {
        &self.interest
    }

    async fn handle_event(&mut self, ctx: &BotContext, event: Event) -> anyhow::Result<()> {
        serde_json::from_str::<serde_json::Value>(&event.content)
            .context("profile metadata is not json")?;
        let name = profile_name(&event.content).unwrap_or_else(|| event.pubkey.to_hex());

        let own_key = ctx.identity()?.public_key();
        let dm = ctx.make_dm(&own_key, format!("Welcome, {}!", name), vec![])?;
        tracing::info!(bot = %self.name, user = %name, dm_id = %dm.id.to_hex(), "welcoming");
        ctx.reply(&dm).await?;
        Ok(())
    }
}
