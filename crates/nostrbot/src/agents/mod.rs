//! Ready-made bots, selectable by name from the command line.

mod gotmail;
mod mirror;
mod ping;
mod tattle;
mod welcome;

pub use gotmail::GotMailBot;
pub use mirror::MirrorBot;
pub use ping::{ping_bot, ping_methods};
pub use tattle::TattleBot;
pub use welcome::WelcomeBot;

use std::sync::Arc;

use serde::Deserialize;

use nostrbot_protocol::EventKind;

use crate::bot::{Bot, LogBot};
use crate::config::{split_list, validate_relay_url, BotConfig, ConfigError, RuntimeConfig};
use crate::identity::Identity;
use crate::pool::{ClientPool, RelayPool};
use crate::scheduler::BotEntry;
use crate::store::{Store, StoreError};

/// Every name [`build`] understands
pub const NAMES: &[&str] = &["nostr", "ping", "welcome", "gotmail", "mirror", "tattle"];

/// Agent-specific settings read from the environment
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// `TARGET`: relay that `mirror` copies to
    pub target: Option<String>,
    /// `TATTLE_WATCH`: only report on these pubkeys
    pub tattle_watch: Vec<String>,
    /// `TATTLE_SEND`: actually DM the subject of a report
    pub tattle_send: bool,
    /// `KINDS`: kinds `gotmail` announces
    pub kinds: Vec<u16>,
    /// `VOICE`: voice for `say`
    pub voice: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            target: None,
            tattle_watch: Vec::new(),
            tattle_send: false,
            kinds: vec![EventKind::ENCRYPTED_DM],
            voice: "Fred".to_string(),
        }
    }
}

impl AgentSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self {
            target: std::env::var("TARGET").ok().filter(|t| !t.trim().is_empty()),
            ..Self::default()
        };
        if let Ok(watch) = std::env::var("TATTLE_WATCH") {
            settings.tattle_watch = split_list(&watch);
        }
        if let Ok(send) = std::env::var("TATTLE_SEND") {
            settings.tattle_send = matches!(send.trim(), "1" | "true" | "yes");
        }
        if let Ok(kinds) = std::env::var("KINDS") {
            settings.kinds = parse_kinds(&kinds)?;
        }
        if let Ok(voice) = std::env::var("VOICE") {
            settings.voice = voice;
        }

        Ok(settings)
    }
}

fn parse_kinds(value: &str) -> Result<Vec<u16>, ConfigError> {
    split_list(value)
        .iter()
        .map(|kind| {
            kind.parse().map_err(|_| ConfigError::InvalidSetting {
                name: "KINDS",
                value: value.to_string(),
            })
        })
        .collect()
}

/// Build the named agent, ready to hand to the scheduler.
pub async fn build(
    name: &str,
    runtime: &RuntimeConfig,
    settings: &AgentSettings,
) -> Result<BotEntry, AgentError> {
    let config = runtime.bot(name);
    config.validate()?;
    let relays = config.relays.clone();

    let (bot, identity): (Box<dyn Bot>, Option<Identity>) = match name {
        "nostr" => (Box::new(LogBot::from_config(&config)), config.identity()?),
        "ping" => {
            let identity = signing_identity(&config)?;
            let owner = runtime.owner()?;
            (Box::new(ping_bot(&config, owner.as_ref())), Some(identity))
        }
        "welcome" => {
            let identity = signing_identity(&config)?;
            (Box::new(WelcomeBot::new(name)), Some(identity))
        }
        "gotmail" => {
            let owner = runtime.owner()?.ok_or(ConfigError::MissingSetting("PUBLIC_KEY"))?;
            let bot = GotMailBot::new(name, &owner, settings.kinds.clone(), settings.voice.clone());
            (Box::new(bot), config.identity()?)
        }
        "mirror" => {
            let owner = runtime.owner()?.ok_or(ConfigError::MissingSetting("PUBLIC_KEY"))?;
            let target = settings
                .target
                .clone()
                .ok_or(ConfigError::MissingSetting("TARGET"))?;
            validate_relay_url(&target)?;
            let store = Store::open(Store::default_path(&format!("mirrorbot-{}", target))).await?;
            let target_pool: Arc<dyn RelayPool> = Arc::new(ClientPool::new(vec![target]));
            (Box::new(MirrorBot::new(name, owner, target_pool, store)), config.identity()?)
        }
        "tattle" => {
            let identity = signing_identity(&config)?;
            let store = Store::open(Store::default_path("tattlebot")).await?;
            let bot = TattleBot::new(name, settings.tattle_watch.clone(), store).send(settings.tattle_send);
            (Box::new(bot), Some(identity))
        }
        _ => return Err(AgentError::NotFound(name.to_string())),
    };

    Ok(BotEntry::new(bot, identity, relays))
}

/// The configured identity, or a fresh one when no key is configured.
fn signing_identity(config: &BotConfig) -> Result<Identity, ConfigError> {
    if let Some(identity) = config.identity()? {
        return Ok(identity);
    }
    let identity = Identity::generate();
    tracing::warn!(
        bot = %config.name,
        npub = %identity.npub(),
        "no private key configured, using a generated key"
    );
    Ok(identity)
}

#[derive(Deserialize)]
struct Profile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// `display_name`, else `name`, from kind 0 metadata. Blank values count as
/// absent.
pub(crate) fn profile_name(metadata: &str) -> Option<String> {
    let profile: Profile = serde_json::from_str(metadata).ok()?;
    profile
        .display_name
        .filter(|n| !n.is_empty())
        .or(profile.name.filter(|n| !n.is_empty()))
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("bot not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
