use std::collections::BTreeMap;

use nostr::{Filter, Kind, PublicKey, SingleLetterTag, Timestamp};
use serde::{Deserialize, Serialize};

use nostrbot_protocol::EventKind;

/// What a bot wants to hear about.
///
/// `kind: None` means "any kind" and is different from `Some(0)`. Likewise
/// `limit: None` asks relays for every stored match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    #[serde(default = "default_kind")]
    pub kind: Option<u16>,
    /// Hex or bech32 public keys
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default)]
    pub until: Option<u64>,
    /// Single-letter tag constraints, e.g. `p -> [pubkey]`
    #[serde(default)]
    pub tags: BTreeMap<char, Vec<String>>,
}

fn default_kind() -> Option<u16> {
    Some(EventKind::TEXT_NOTE)
}

fn default_limit() -> Option<usize> {
    Some(1)
}

impl Default for Interest {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            authors: Vec::new(),
            limit: default_limit(),
            since: None,
            until: None,
            tags: BTreeMap::new(),
        }
    }
}

impl Interest {
    pub fn kind(mut self, kind: Option<u16>) -> Self {
        self.kind = kind;
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn since(mut self, since: Option<u64>) -> Self {
        self.since = since;
        self
    }

    pub fn tag(mut self, letter: char, values: Vec<String>) -> Self {
        self.tags.insert(letter, values);
        self
    }

    /// Build the subscription filter for this interest.
    pub fn to_filter(&self) -> Filter {
        build_filter(self)
    }
}

/// Turn an [`Interest`] into a [`Filter`].
///
/// `kinds` is only present when a kind was declared, `limit` only when one
/// is set and `authors` only when at least one author parses. Blank or
/// malformed author entries are dropped with a warning.
pub fn build_filter(interest: &Interest) -> Filter {
    let mut filter = Filter::new();

    if let Some(limit) = interest.limit {
        filter = filter.limit(limit);
    }

    let authors: Vec<PublicKey> = interest
        .authors
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .filter_map(|a| match PublicKey::parse(a) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(author = %a, error = %e, "skipping malformed author");
                None
            }
        })
        .collect();
    if !authors.is_empty() {
        filter = filter.authors(authors);
    }

    if let Some(kind) = interest.kind {
        filter = filter.kind(Kind::from(kind));
    }
    if let Some(since) = interest.since {
        filter = filter.since(Timestamp::from(since));
    }
    if let Some(until) = interest.until {
        filter = filter.until(Timestamp::from(until));
    }
    for (letter, values) in &interest.tags {
        if values.is_empty() {
            continue;
        }
        match SingleLetterTag::from_char(*letter) {
            Ok(tag) => filter = filter.custom_tag(tag, values.iter().cloned()),
            Err(e) => tracing::warn!(tag = %letter, error = %e, "skipping tag constraint"),
        }
    }

    filter
}
