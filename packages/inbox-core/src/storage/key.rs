//! # Storage Keys
//!
//! Structured composite keys with a single encode/decode pair.
//!
//! ## Encoding
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         KEY ENCODING                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  StorageKey { domain: Consent, ids: ["0xa1", "0xb2"] }                 │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  "CONSENT_0xa1_0xb2"                                                   │
//! │                                                                         │
//! │  Ids are escaped before joining so a separator inside an id can       │
//! │  never make two different keys collide:                                │
//! │                                                                         │
//! │     '%'  ──►  "%25"                                                    │
//! │     '_'  ──►  "%5F"                                                    │
//! │                                                                         │
//! │  StorageKey { Consent, ["a_b", "c"] }  ──►  "CONSENT_a%5Fb_c"          │
//! │  StorageKey { Consent, ["a", "b_c"] }  ──►  "CONSENT_a_b%5Fc"          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use crate::address::{Address, ConsentSubject, Topic};
use crate::error::{Error, Result};

const SEPARATOR: char = '_';

/// Logical domain of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Legacy per-address ENS name
    EnsName,
    /// Legacy per-address ENS avatar URL
    EnsAvatar,
    /// Per-address contact record (JSON)
    ContactInfo,
    /// Per-owner count of conversations in the requests partition
    MessageRequestsCount,
    /// Per-(owner, topic) draft text
    DraftText,
    /// Per-(owner, topic) draft image URI
    DraftImage,
    /// Per-(owner, subject) consent flag
    Consent,
    /// Per-topic comma-joined participant list
    TopicAddresses,
}

impl Domain {
    /// Every domain, used when decoding
    pub const ALL: [Domain; 8] = [
        Domain::EnsName,
        Domain::EnsAvatar,
        Domain::ContactInfo,
        Domain::MessageRequestsCount,
        Domain::DraftText,
        Domain::DraftImage,
        Domain::Consent,
        Domain::TopicAddresses,
    ];

    /// Key prefix for this domain
    pub fn prefix(&self) -> &'static str {
        match self {
            Domain::EnsName => "ENS_NAME",
            Domain::EnsAvatar => "ENS_AVATAR",
            Domain::ContactInfo => "CONTACT_INFO",
            Domain::MessageRequestsCount => "MESSAGE_REQUESTS_COUNT",
            Domain::DraftText => "DRAFT_TEXT",
            Domain::DraftImage => "DRAFT_IMAGE",
            Domain::Consent => "CONSENT",
            Domain::TopicAddresses => "TOPIC_ADDRESSES",
        }
    }

    /// Number of id segments a key in this domain carries
    pub fn arity(&self) -> usize {
        match self {
            Domain::DraftText | Domain::DraftImage | Domain::Consent => 2,
            _ => 1,
        }
    }
}

/// A namespaced key into the key-value store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    domain: Domain,
    ids: Vec<String>,
}

impl StorageKey {
    /// Build a key, checking the id count against the domain
    pub fn new(domain: Domain, ids: Vec<String>) -> Result<Self> {
        if ids.len() != domain.arity() {
            return Err(Error::InvalidStorageKey(format!(
                "{} expects {} id(s), got {}",
                domain.prefix(),
                domain.arity(),
                ids.len()
            )));
        }
        Ok(Self { domain, ids })
    }

    fn one(domain: Domain, id: &str) -> Self {
        Self {
            domain,
            ids: vec![id.to_string()],
        }
    }

    fn two(domain: Domain, first: &str, second: &str) -> Self {
        Self {
            domain,
            ids: vec![first.to_string(), second.to_string()],
        }
    }

    /// `ENS_NAME_<address>`
    pub fn ens_name(address: &Address) -> Self {
        Self::one(Domain::EnsName, address.as_str())
    }

    /// `ENS_AVATAR_<address>`
    pub fn ens_avatar(address: &Address) -> Self {
        Self::one(Domain::EnsAvatar, address.as_str())
    }

    /// `CONTACT_INFO_<address>`
    pub fn contact_info(address: &Address) -> Self {
        Self::one(Domain::ContactInfo, address.as_str())
    }

    /// `MESSAGE_REQUESTS_COUNT_<owner>`
    pub fn message_requests_count(owner: &Address) -> Self {
        Self::one(Domain::MessageRequestsCount, owner.as_str())
    }

    /// `DRAFT_TEXT_<owner>_<topic>`
    pub fn draft_text(owner: &Address, topic: &Topic) -> Self {
        Self::two(Domain::DraftText, owner.as_str(), topic.as_str())
    }

    /// `DRAFT_IMAGE_<owner>_<topic>`
    pub fn draft_image(owner: &Address, topic: &Topic) -> Self {
        Self::two(Domain::DraftImage, owner.as_str(), topic.as_str())
    }

    /// `CONSENT_<owner>_<peer or topic>`
    pub fn consent(owner: &Address, subject: &ConsentSubject) -> Self {
        Self::two(Domain::Consent, owner.as_str(), subject.key_id())
    }

    /// `TOPIC_ADDRESSES_<topic>`
    pub fn topic_addresses(topic: &Topic) -> Self {
        Self::one(Domain::TopicAddresses, topic.as_str())
    }

    /// The key's domain
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// The unescaped id segments
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Encode to the flat string form
    pub fn encode(&self) -> String {
        let mut out = String::from(self.domain.prefix());
        for id in &self.ids {
            out.push(SEPARATOR);
            out.push_str(&escape(id));
        }
        out
    }

    /// Decode a flat string produced by [`StorageKey::encode`]
    pub fn decode(raw: &str) -> Result<Self> {
        // Longest matching prefix wins
        let mut candidates: Vec<Domain> = Domain::ALL
            .iter()
            .copied()
            .filter(|d| {
                raw.strip_prefix(d.prefix())
                    .map_or(false, |rest| rest.starts_with(SEPARATOR))
            })
            .collect();
        candidates.sort_by_key(|d| std::cmp::Reverse(d.prefix().len()));

        for domain in candidates {
            let rest = &raw[domain.prefix().len() + 1..];
            let segments: Vec<&str> = rest.split(SEPARATOR).collect();
            if segments.len() != domain.arity() {
                continue;
            }
            let ids = segments
                .into_iter()
                .map(unescape)
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self { domain, ids });
        }

        Err(Error::InvalidStorageKey(raw.to_string()))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for StorageKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

fn escape(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(segment: &str) -> Result<String> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "5F" => out.push('_'),
            _ => {
                return Err(Error::InvalidStorageKey(format!(
                    "bad escape %{} in {}",
                    code, segment
                )))
            }
        }
    }
    Ok(out)
}
