use async_trait::async_trait;
use nostr::nips::nip19::ToBech32;
use nostr::{Event, EventId, Filter, PublicKey};
use serde_json::json;

use nostrbot_protocol::EventKind;

use crate::bot::{Bot, BotContext};
use crate::identity::parse_public_key;
use crate::query::{build_filter, Interest};
use crate::store::Store;

const LAST_SEEN: &str = "last_seen";

/// What a kind 1984 report says, pulled from its tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub report_type: String,
    pub event_id: String,
    pub subject: String,
    pub impersonated: String,
}

impl Report {
    pub fn from_event(event: &Event) -> Self {
        let mut report = Self::default();
        for tag in event.tags.iter() {
            match tag.as_slice() {
                [name, value, ..] if name == "report" => report.report_type = value.clone(),
                [name, value, ..] if name == "e" => report.event_id = value.clone(),
                [name, value, marker] if name == "p" && marker == "impersonation" => {
                    report.impersonated = value.clone()
                }
                [name, value, ..] if name == "p" => report.subject = value.clone(),
                _ => {}
            }
        }
        report
    }
}

/// Tells people when someone reported them.
///
/// The query carries no limit, so every report since the last one seen is
/// replayed after a restart. By default the notification is only logged; with sending enabled it is
/// DMed to the subject of the report.
pub struct TattleBot {
    name: String,
    interest: Interest,
    send: bool,
    store: Store,
}

impl TattleBot {
    pub fn new(name: impl Into<String>, watch: Vec<String>, store: Store) -> Self {
        let mut interest = Interest::default()
            .kind(Some(EventKind::REPORT))
            .limit(None);
        if !watch.is_empty() {
            interest = interest.tag('p', watch);
        }
        Self {
            name: name.into(),
            interest,
            send: false,
            store,
        }
    }

    pub fn send(mut self, send: bool) -> Self {
        self.send = send;
        self
    }

    fn last_seen(&self) -> u64 {
        self.store.get(LAST_SEEN).unwrap_or(0)
    }

    /// Notify the subject, returning the id of the DM if one was sent.
    async fn deliver(
        &self,
        ctx: &BotContext,
        event: &Event,
        subject: &str,
        message: &str,
    ) -> anyhow::Result<Option<String>> {
        if subject.is_empty() || message.is_empty() {
            return Ok(None);
        }
        if !self.send {
            tracing::info!(
                bot = %self.name,
                reporter = %event.pubkey.to_hex(),
                subject = %subject,
                "tattled, sending:\n{}",
                message
            );
            return Ok(None);
        }

        let recipient = parse_public_key(subject)?;
        let dm = ctx.make_dm(&recipient, message, vec![])?;
        ctx.reply(&dm).await?;
        tracing::info!(
            bot = %self.name,
            subject = %subject,
            report_id = %event.id.to_hex(),
            dm_id = %dm.id.to_hex(),
            "alerted subject"
        );
        Ok(Some(dm.id.to_hex()))
    }
}

/// The notification text for `report`
pub fn create_message(event: &Event, report: &Report) -> String {
    let reporter = npub(&event.pubkey);
    let place = if report.event_id.is_empty() {
        "<somewhere>".to_string()
    } else {
        note_id(&report.event_id)
    };
    let reason = match report.report_type.as_str() {
        "spam" => "spamming".to_string(),
        "illegal" => "doing something illegal".to_string(),
        "impersonation" => format!(
            "impersonating {}",
            parse_public_key(&report.impersonated)
                .map(|key| npub(&key))
                .unwrap_or_else(|_| report.impersonated.clone())
        ),
        other => other.to_string(),
    };

    format!(
        "YOU'RE IN TROUBLE\n{} tattled on you for {} in {}.\nThey said you were \"{}\"\n\nJust letting you know.\n\nSent by TattleBot.\n",
        reporter, reason, place, event.content
    )
}

fn npub(key: &PublicKey) -> String {
    key.to_bech32().unwrap_or_else(|_| key.to_hex())
}

fn note_id(id: &str) -> String {
    EventId::from_hex(id)
        .ok()
        .and_then(|id| id.to_bech32().ok())
        .unwrap_or_else(|| id.to_string())
}

#[async_trait]
impl Bot for TattleBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> &Interest {
        &self.interest
    }

    async fn query(&mut self, _ctx: &BotContext) -> anyhow::Result<Filter> {
        let last_seen = self.last_seen();
        let since = (last_seen > 0).then_some(last_seen);
        Ok(build_filter(&self.interest.clone().since(since)))
    }

    async fn handle_event(&mut self, ctx: &BotContext, event: Event) -> anyhow::Result<()> {
        let id = event.id.to_hex();
        if self.store.contains(&id) {
            tracing::info!(bot = %self.name, event_id = %id, "skipping");
            return Ok(());
        }

        let report = Report::from_event(&event);
        let message = create_message(&event, &report);
        let response = self.deliver(ctx, &event, &report.subject, &message).await?;

        let created_at = event.created_at.as_u64();
        if created_at > self.last_seen() {
            self.store.set(LAST_SEEN, &created_at).await?;
        }
        let seen = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.store
            .set(id, &json!({"seen": seen, "response": response}))
            .await?;
        Ok(())
    }
}
