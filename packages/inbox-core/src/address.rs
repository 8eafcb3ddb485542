//! # Addresses and Topics
//!
//! Identifier newtypes shared by every cache.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          IDENTIFIERS                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Address   "0xAbC123..."  ──► normalized to "0xabc123..."              │
//! │            case-insensitive, compared and stored lowercase             │
//! │                                                                         │
//! │  Topic     "/xmtp/0/g-6c1e.../proto"  ──► kept verbatim                │
//! │            opaque, stable for the lifetime of the conversation         │
//! │                                                                         │
//! │  ConsentSubject = Peer(Address) | Conversation(Topic)                  │
//! │            what a consent record is about                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Characters kept on each side of a shortened address
const FORMAT_HEAD: usize = 6;
const FORMAT_TAIL: usize = 4;

/// A participant address, always lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidAddress("address is empty".into()));
        }
        if trimmed.contains(char::is_whitespace) || trimmed.contains(',') {
            return Err(Error::InvalidAddress(format!(
                "address contains a separator: {}",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// The normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for display when no name is known
    pub fn formatted(&self) -> String {
        format_address(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Conversation or group identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap a topic string as-is
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// The raw topic string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a consent record is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentSubject {
    /// A single peer address
    Peer(Address),
    /// A whole conversation or group
    Conversation(Topic),
}

impl ConsentSubject {
    /// The id segment used in storage keys
    pub fn key_id(&self) -> &str {
        match self {
            ConsentSubject::Peer(address) => address.as_str(),
            ConsentSubject::Conversation(topic) => topic.as_str(),
        }
    }
}

impl From<Address> for ConsentSubject {
    fn from(address: Address) -> Self {
        ConsentSubject::Peer(address)
    }
}

impl From<Topic> for ConsentSubject {
    fn from(topic: Topic) -> Self {
        ConsentSubject::Conversation(topic)
    }
}

/// Shorten an address to `0x1234...abcd`
pub fn format_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= FORMAT_HEAD + FORMAT_TAIL {
        return address.to_string();
    }
    let head: String = chars[..FORMAT_HEAD].iter().collect();
    let tail: String = chars[chars.len() - FORMAT_TAIL..].iter().collect();
    format!("{}...{}", head, tail)
}
