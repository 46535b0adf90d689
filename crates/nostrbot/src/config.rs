use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::query::Interest;

pub const DEFAULT_RELAYS: &[&str] = &["wss://nostr.mom", "wss://relay.damus.io"];

/// Static configuration of one bot instance.
///
/// Immutable once handed to a bot; two instances of the same agent type can
/// run side by side with different configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Used as the log target and task name
    pub name: String,
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    #[serde(default)]
    pub interest: Interest,
    /// `nsec…` or hex
    #[serde(default)]
    pub private_key: Option<String>,
    /// `npub…` or hex; must match the key derived from `private_key`
    #[serde(default)]
    pub public_key: Option<String>,
    /// NIP-04 encrypt RPC traffic
    #[serde(default)]
    pub encrypted: bool,
    /// Wait for a relay `OK` when sending RPC replies
    #[serde(default = "default_true")]
    pub confirm_replies: bool,
}

fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl BotConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relays: default_relays(),
            interest: Interest::default(),
            private_key: None,
            public_key: None,
            encrypted: false,
            confirm_replies: true,
        }
    }

    pub fn relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    pub fn interest(mut self, interest: Interest) -> Self {
        self.interest = interest;
        self
    }

    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = Some(key.into());
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

    /// Derive and validate the identity, if a private key is configured.
    pub fn identity(&self) -> Result<Option<Identity>, ConfigError> {
        match &self.private_key {
            Some(secret) if !secret.trim().is_empty() => {
                Identity::new(secret, self.public_key.as_deref()).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Like [`identity`](Self::identity), but a missing key is an error.
    pub fn require_identity(&self) -> Result<Identity, ConfigError> {
        self.identity()?
            .ok_or_else(|| ConfigError::MissingKey(self.name.clone()))
    }

    /// Check relay URLs before anything tries to connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relays.is_empty() {
            return Err(ConfigError::NoRelays(self.name.clone()));
        }
        for relay in &self.relays {
            validate_relay_url(relay)?;
        }
        self.identity()?;
        Ok(())
    }
}

pub fn validate_relay_url(relay: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(relay).map_err(|e| ConfigError::InvalidRelay {
        url: relay.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidRelay {
            url: relay.to_string(),
            reason: format!("unsupported scheme {}", other),
        }),
    }
}

/// Process-wide settings shared by every bot started from the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub relays: Vec<String>,
    /// The bots' own key pair
    #[serde(default)]
    pub keys: KeyConfig,
    /// Public key of the person the bots work for (`PUBLIC_KEY`)
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyConfig {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
}

impl RuntimeConfig {
    /// Load config from file and environment variables.
    /// Environment variables take precedence over file config.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file()?;

        if let Ok(relays) = std::env::var("NOSTR_RELAYS") {
            config.relays = split_list(&relays);
        }
        if let Some(key) = std::env::var("NOSTR_KEY")
            .ok()
            .or_else(|| std::env::var("PRIVATE_KEY").ok())
        {
            config.keys.private_key = Some(key);
        }
        if let Ok(key) = std::env::var("PUBLIC_KEY") {
            config.owner = Some(key);
        }

        Ok(config)
    }

    fn load_from_file() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".nostrbot/config.toml")
    }

    /// Relays to use, falling back to the defaults
    pub fn relays(&self) -> Vec<String> {
        if self.relays.is_empty() {
            default_relays()
        } else {
            self.relays.clone()
        }
    }

    /// The owner's public key, if configured and valid.
    pub fn owner(&self) -> Result<Option<nostr::PublicKey>, ConfigError> {
        self.owner
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map(crate::identity::parse_public_key)
            .transpose()
    }

    /// Seed a bot config with the process-wide relays and keys.
    pub fn bot(&self, name: impl Into<String>) -> BotConfig {
        let mut config = BotConfig::new(name).relays(self.relays());
        config.private_key = self.keys.private_key.clone();
        config.public_key = self.keys.public_key.clone();
        config
    }
}

/// Split a comma-separated env value, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("configured public key {configured} does not match key derived from secret {derived}")]
    IdentityMismatch { configured: String, derived: String },
    #[error("bot {0} needs a private key")]
    MissingKey(String),
    #[error("bot {0} has no relays")]
    NoRelays(String),
    #[error("invalid relay url {url}: {reason}")]
    InvalidRelay { url: String, reason: String },
    #[error("missing setting {0}")]
    MissingSetting(&'static str),
    #[error("invalid {name}: {value}")]
    InvalidSetting { name: &'static str, value: String },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}
