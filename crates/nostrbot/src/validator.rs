use nostr::Event;
use serde_json::Value;

/// Outcome of checking a raw event received from a relay.
#[derive(Debug)]
pub enum Verdict {
    /// Id and signature check out
    Valid(Box<Event>),
    /// Well-formed, but the id or signature does not match
    Invalid { id: String, reason: String },
    /// Keys, id or signature could not even be decoded
    Malformed { reason: String },
}

/// Decode and verify a raw event.
pub fn validate(raw: &Value) -> Verdict {
    let event: Event = match serde_json::from_value(raw.clone()) {
        Ok(event) => event,
        Err(e) => {
            return Verdict::Malformed {
                reason: e.to_string(),
            }
        }
    };

    match event.verify() {
        Ok(()) => Verdict::Valid(Box::new(event)),
        Err(e) => Verdict::Invalid {
            id: event.id.to_hex(),
            reason: e.to_string(),
        },
    }
}

/// Validate and log. Returns the event only if it may reach a handler.
pub fn check(bot: &str, raw: &Value) -> Option<Event> {
    match validate(raw) {
        Verdict::Valid(event) => Some(*event),
        Verdict::Invalid { id, reason } => {
            tracing::warn!(bot = %bot, event_id = %id, reason = %reason, "invalid event");
            None
        }
        Verdict::Malformed { reason } => {
            tracing::error!(bot = %bot, reason = %reason, "unverifiable event");
            None
        }
    }
}
