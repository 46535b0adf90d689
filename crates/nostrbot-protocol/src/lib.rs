//! Shared protocol definitions for nostrbot.
//!
//! Everything in here is plain data: the RPC command envelope carried in
//! event content and the event kinds the runtime cares about. Filters and
//! relay frames come from the `nostr` crate.

pub mod envelope;

pub use envelope::{CommandEnvelope, EnvelopeError};

// ============================================================================
// Event Kind Constants
// ============================================================================

/// Event kinds used by the runtime and the bundled agents.
pub struct EventKind;

impl EventKind {
    // NIP-01
    pub const METADATA: u16 = 0;
    pub const TEXT_NOTE: u16 = 1;

    // NIP-02
    pub const CONTACTS: u16 = 3;

    // NIP-04
    pub const ENCRYPTED_DM: u16 = 4;

    // NIP-25
    pub const REACTION: u16 = 7;

    // NIP-56
    pub const REPORT: u16 = 1984;

    // Ephemeral range, default kind for RPC bots
    pub const RPC: u16 = 22222;
}
