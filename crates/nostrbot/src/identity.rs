use std::fmt;

use nostr::nips::nip04;
use nostr::nips::nip19::{FromBech32, ToBech32};
use nostr::{Event, EventBuilder, Keys, Kind, PublicKey, Tag};

use crate::config::ConfigError;

/// A bot's signing identity.
///
/// The public key is always derived from the secret key when the identity is
/// built; a separately configured public key is only accepted if it agrees.
#[derive(Clone)]
pub struct Identity {
    keys: Keys,
}

impl Identity {
    /// Build an identity from a secret key (`nsec…` or hex) and an optional
    /// expected public key (`npub…` or hex).
    pub fn new(secret_key: &str, public_key: Option<&str>) -> Result<Self, ConfigError> {
        let keys = Keys::parse(secret_key.trim())
            .map_err(|e| ConfigError::InvalidSecretKey(e.to_string()))?;
        let derived = keys.public_key();

        if let Some(configured) = public_key.filter(|p| !p.trim().is_empty()) {
            let configured = parse_public_key(configured)?;
            if configured != derived {
                return Err(ConfigError::IdentityMismatch {
                    configured: configured.to_hex(),
                    derived: derived.to_hex(),
                });
            }
        }

        Ok(Self { keys })
    }

    /// Fresh random identity
    pub fn generate() -> Self {
        Self {
            keys: Keys::generate(),
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn npub(&self) -> String {
        let public_key = self.public_key();
        public_key.to_bech32().unwrap_or_else(|_| public_key.to_hex())
    }

    /// NIP-04 encrypt `plaintext` for `recipient`
    pub fn encrypt(&self, recipient: &PublicKey, plaintext: &str) -> Result<String, CryptoError> {
        nip04::encrypt(self.keys.secret_key(), recipient, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }

    /// NIP-04 decrypt `ciphertext` sent by `sender`
    pub fn decrypt(&self, sender: &PublicKey, ciphertext: &str) -> Result<String, CryptoError> {
        nip04::decrypt(self.keys.secret_key(), sender, ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Build and sign an event authored by this identity.
    pub fn sign(&self, kind: u16, content: String, tags: Vec<Tag>) -> Result<Event, CryptoError> {
        EventBuilder::new(Kind::from(kind), content)
            .tags(tags)
            .sign_with_keys(&self.keys)
            .map_err(|e| CryptoError::Sign(e.to_string()))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Parse a public key given as `npub…` or hex.
pub fn parse_public_key(value: &str) -> Result<PublicKey, ConfigError> {
    let value = value.trim();
    let parsed = if value.starts_with("npub") {
        PublicKey::from_bech32(value).map_err(|e| e.to_string())
    } else {
        PublicKey::from_hex(value).map_err(|e| e.to_string())
    };
    parsed.map_err(ConfigError::InvalidPublicKey)
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("signing failed: {0}")]
    Sign(String),
}
