use std::collections::HashMap;

use async_trait::async_trait;
use nostr::{Event, Filter, Kind, PublicKey};

use nostrbot_protocol::EventKind;

use crate::bot::{Bot, BotContext};
use crate::query::{build_filter, Interest};

use super::profile_name;

/// Speaks an announcement whenever someone mentions the owner.
///
/// Sender names come from their kind 0 profile, looked up once per sender.
pub struct GotMailBot {
    name: String,
    interest: Interest,
    kinds: Vec<u16>,
    voice: String,
    speak: bool,
    names: HashMap<PublicKey, String>,
}

impl GotMailBot {
    pub fn new(name: impl Into<String>, owner: &PublicKey, kinds: Vec<u16>, voice: String) -> Self {
        Self {
            name: name.into(),
            interest: Interest::default().kind(None).tag('p', vec![owner.to_hex()]),
            kinds,
            voice,
            speak: true,
            names: HashMap::new(),
        }
    }

    /// Log announcements without running `say`
    pub fn silent(mut self) -> Self {
        self.speak = false;
        self
    }

    async fn sender_name(&mut self, ctx: &BotContext, sender: &PublicKey) -> String {
        if let Some(name) = self.names.get(sender) {
            return name.clone();
        }

        let hex = sender.to_hex();
        let mut name = hex[..4].to_string();
        let filter = Filter::new().author(*sender).kind(Kind::Metadata).limit(1);
        match ctx.fetch(filter).await {
            Ok(profiles) => {
                if let Some(found) = profiles.iter().find_map(|p| profile_name(&p.content)) {
                    name = found;
                }
            }
            Err(e) => tracing::warn!(bot = %self.name, sender = %hex, error = %e, "profile lookup failed"),
        }

        self.names.insert(*sender, name.clone());
        name
    }

    async fn say(&self, announcement: &str) {
        let status = tokio::process::Command::new("say")
            .arg(announcement)
            .arg("-v")
            .arg(&self.voice)
            .status()
            .await;
        if let Err(e) = status {
            tracing::error!(bot = %self.name, error = %e, "cannot speak the announcement");
        }
    }
}

/// "You've got a reply from alice"
pub fn announcement(kind: u16, sender: &str) -> String {
    let what = match kind {
        EventKind::REACTION => "a reaction",
        EventKind::TEXT_NOTE => "a reply",
        _ => "mail",
    };
    format!("You've got {} from {}", what, sender)
}

#[async_trait]
impl Bot for GotMailBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> &Interest {
        &self.interest
    }

    async fn query(&mut self, _ctx: &BotContext) -> anyhow::Result<Filter> {
        Ok(build_filter(&self.interest).kinds(self.kinds.iter().copied().map(Kind::from)))
    }

    async fn handle_event(&mut self, ctx: &BotContext, event: Event) -> anyhow::Result<()> {
        let sender = self.sender_name(ctx, &event.pubkey).await;
        let text = announcement(event.kind.as_u16(), &sender);
        tracing::info!(bot = %self.name, "{}", text);
        if self.speak {
            self.say(&text).await;
        }
        Ok(())
    }
}
