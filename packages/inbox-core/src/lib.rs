//! # Inbox Core
//!
//! Local conversation cache and consent reconciliation for a wallet-based
//! messaging client. The protocol, keys and attachment encryption belong to
//! the messaging SDK behind [`client::MessagingClient`]; this crate keeps the
//! state a client application needs between remote round trips.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         INBOX CORE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                        ┌─────────────────────┐                          │
//! │                        │   SyncCoordinator   │                          │
//! │                        │ - focus refetch     │                          │
//! │                        │ - send queue        │                          │
//! │                        └──────────┬──────────┘                          │
//! │                                   │                                     │
//! │        ┌──────────────────────────┼─────────────────────┐               │
//! │        ▼                          ▼                     ▼               │
//! │  ┌─────────────┐        ┌───────────────────┐   ┌─────────────┐        │
//! │  │ DraftStore  │        │ ConversationIndex │   │  Messaging  │        │
//! │  │             │        │ - merge / sort    │   │  Client     │        │
//! │  │ - text      │        │ - partition       │   │  (remote)   │        │
//! │  │ - image     │        └────┬─────────┬────┘   └─────────────┘        │
//! │  └──────┬──────┘             ▼         ▼                                │
//! │         │          ┌──────────────┐ ┌──────────────────┐                │
//! │         │          │ ConsentCache │ │ ContactInfoCache │                │
//! │         │          └──────┬───────┘ └────────┬─────────┘                │
//! │         │                 │                  │                          │
//! │         └─────────────────┴────────┬─────────┘                          │
//! │                                    ▼                                    │
//! │                      ┌───────────────────────────┐                      │
//! │                      │  KeyValueStore (SQLite)   │                      │
//! │                      │  single source of truth   │                      │
//! │                      └───────────────────────────┘                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`address`] - Addresses, topics and consent subjects
//! - [`storage`] - Durable key-value store and composite keys
//! - [`client`] - Messaging client and blob uploader interfaces
//! - [`consent`] - Consent state with optimistic writes
//! - [`contacts`] - Display name and avatar cache
//! - [`conversations`] - Conversation list projection and search
//! - [`drafts`] - Unsent text and images
//! - [`sync`] - Screen focus, refetch and send ordering
//!
//! Every in-memory cache can be dropped and rebuilt from the store plus a
//! fresh remote fetch. Nothing here is a global: each [`InboxCore`] owns its
//! own store handle.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod address;
pub mod client;
pub mod consent;
pub mod contacts;
pub mod conversations;
pub mod drafts;
pub mod error;
pub mod storage;
pub mod sync;
/// Timestamp helpers.
pub mod time;

#[cfg(test)]
mod testing;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use address::{Address, ConsentSubject, Topic};
pub use consent::{ConsentCache, ConsentOutcome, ConsentState, PendingConsent};
pub use contacts::{ContactInfo, ContactInfoCache};
pub use conversations::{ConversationIndex, ConversationList, ConversationSummary};
pub use drafts::{DraftEntry, DraftStore};
pub use error::{Error, Result};
pub use storage::{KeyValueStore, StorageConfig};
pub use sync::{OutgoingContent, SyncCoordinator};

// ============================================================================
// CORE INSTANCE
// ============================================================================

use std::sync::Arc;

use client::{BlobUploader, MessagingClient};

/// Configuration for an [`InboxCore`]
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Database file path (in-memory if None)
    pub storage_path: Option<String>,
    /// Messages fetched when a conversation gains focus
    pub message_page_size: usize,
    /// Recent conversations offered by search
    pub recents_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            message_page_size: 50,
            recents_limit: 3,
        }
    }
}

impl CoreConfig {
    /// Reject unusable settings
    pub fn validate(&self) -> Result<()> {
        if self.message_page_size == 0 {
            return Err(Error::InvalidConfig("message_page_size must be at least 1".into()));
        }
        if matches!(&self.storage_path, Some(path) if path.trim().is_empty()) {
            return Err(Error::InvalidConfig("storage_path is empty".into()));
        }
        Ok(())
    }

    /// Storage settings derived from this config
    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            database_path: self.storage_path.clone(),
        }
    }
}

/// Every cache wired around one store
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        INBOX CORE LIFECYCLE                             │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Open                                                               │
/// │     InboxCore::open(config, client, uploader)                          │
/// │        ──► validate config                                             │
/// │        ──► open SQLite store (file or in-memory)                       │
/// │        ──► build caches over the shared store                          │
/// │                                                                         │
/// │  2. Cold start                                                         │
/// │     message_requests_count, drafts, consent readable at once           │
/// │                                                                         │
/// │  3. Active                                                             │
/// │     sync().refresh_conversations / on_focus / send                     │
/// │     allow_conversation / block_conversation                            │
/// │                                                                         │
/// │  4. Sign out                                                           │
/// │     clear_all() wipes the store and in-memory state                    │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub struct InboxCore {
    /// Configuration
    config: CoreConfig,
    /// Shared store
    store: Arc<dyn KeyValueStore>,
    /// Consent
    consent: Arc<ConsentCache>,
    /// Contact display data
    contacts: Arc<ContactInfoCache>,
    /// Conversation list
    conversations: Arc<ConversationIndex>,
    /// Drafts
    drafts: Arc<DraftStore>,
    /// Screen coordination
    sync: SyncCoordinator,
}

impl InboxCore {
    /// Open the store named by `config` and build every service over it
    pub fn open(
        config: CoreConfig,
        client: Arc<dyn MessagingClient>,
        uploader: Arc<dyn BlobUploader>,
    ) -> Result<Self> {
        config.validate()?;
        let store = storage::open(&config.storage())?;
        Self::with_store(config, store, client, uploader)
    }

    /// Build every service over a caller-provided store
    pub fn with_store(
        config: CoreConfig,
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn MessagingClient>,
        uploader: Arc<dyn BlobUploader>,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!("Opening Inbox Core v{}", env!("CARGO_PKG_VERSION"));

        let consent = Arc::new(ConsentCache::new(store.clone(), client.clone()));
        let contacts = Arc::new(ContactInfoCache::new(store.clone(), client.clone()));
        let conversations = Arc::new(ConversationIndex::new(
            store.clone(),
            client.clone(),
            consent.clone(),
            contacts.clone(),
        ));
        let drafts = Arc::new(DraftStore::new(store.clone()));
        let sync = SyncCoordinator::new(
            &config,
            client,
            uploader,
            consent.clone(),
            conversations.clone(),
            drafts.clone(),
        );

        Ok(Self {
            config,
            store,
            consent,
            contacts,
            conversations,
            drafts,
            sync,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Consent cache
    pub fn consent(&self) -> &ConsentCache {
        &self.consent
    }

    /// Contact cache
    pub fn contacts(&self) -> &ContactInfoCache {
        &self.contacts
    }

    /// Conversation index
    pub fn conversations(&self) -> &ConversationIndex {
        &self.conversations
    }

    /// Draft store
    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    /// Sync coordinator
    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// Consent the conversation screen opens with
    pub fn initial_consent_state(&self, owner: &Address, topic: &Topic) -> Result<ConsentState> {
        self.consent.initial_consent_state(owner, topic)
    }

    /// Allow a conversation and everyone in it
    pub async fn allow_conversation(&self, owner: &Address, topic: &Topic) -> Result<ConsentOutcome> {
        self.set_conversation_consent(owner, topic, true).await
    }

    /// Block a conversation and everyone in it
    pub async fn block_conversation(&self, owner: &Address, topic: &Topic) -> Result<ConsentOutcome> {
        self.set_conversation_consent(owner, topic, false).await
    }

    async fn set_conversation_consent(
        &self,
        owner: &Address,
        topic: &Topic,
        allowed: bool,
    ) -> Result<ConsentOutcome> {
        let subject = ConsentSubject::Conversation(topic.clone());
        let peers = match self.conversations.peers_of(owner, topic) {
            Ok(peers) => peers,
            Err(Error::ConversationNotFound(_)) => {
                return self.consent.commit_unpushed(
                    owner,
                    &subject,
                    allowed,
                    Error::ConversationNotFound(topic.to_string()),
                );
            }
            Err(e) => return Err(e),
        };

        // Every local effect lands before the push is awaited
        let pending = self.consent.commit(owner, &subject, &peers, allowed)?;

        // One-to-one conversations also record the peer itself
        if let [peer] = peers.as_slice() {
            self.consent
                .set_consent(owner, &ConsentSubject::Peer(peer.clone()), allowed)?;
        }
        self.conversations.repartition()?;

        Ok(pending.outcome().await)
    }

    /// Wipe the store and every in-memory layer
    pub fn clear_all(&self) -> Result<()> {
        self.store.clear_all()?;
        self.consent.reset();
        self.contacts.clear_memory();
        self.conversations.reset();
        tracing::info!("Inbox Core state cleared");
        Ok(())
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Inbox Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        target: std::env::consts::OS,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{addr, convo, settle, MockClient, MockUploader};

    fn core_with(client: Arc<MockClient>) -> InboxCore {
        InboxCore::with_store(
            CoreConfig::default(),
            Arc::new(MemoryStore::new()),
            client,
            MockUploader::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
    }

    #[test]
    fn test_config_validation() {
        assert!(CoreConfig::default().validate().is_ok());

        let config = CoreConfig {
            message_page_size: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = CoreConfig {
            storage_path: Some("  ".into()),
            ..CoreConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().code(), 100);
    }

    #[test]
    fn test_open_in_memory() {
        let core = InboxCore::open(CoreConfig::default(), MockClient::new(), MockUploader::new()).unwrap();
        assert_eq!(core.config().recents_limit, 3);
    }

    #[tokio::test]
    async fn test_block_moves_conversation_out_of_default_view() {
        let client = MockClient::new();
        client.set_conversations(vec![convo("dm", &["0xA1", "0xB2"], 100)]);
        let core = core_with(client.clone());
        let (owner, peer, topic) = (addr("0xA1"), addr("0xB2"), Topic::new("dm"));

        assert_eq!(core.initial_consent_state(&owner, &topic).unwrap(), ConsentState::Unknown);
        let list = core.sync().refresh_conversations(&owner).await.unwrap().unwrap();
        assert_eq!(list.requests.len(), 1);

        let outcome = core.block_conversation(&owner, &topic).await.unwrap();

        assert_eq!(outcome.state, ConsentState::Denied);
        assert_eq!(
            core.consent().get_consent(&owner, &ConsentSubject::Peer(peer.clone())).unwrap(),
            ConsentState::Denied
        );
        let list = core.conversations().latest().unwrap();
        assert!(list.allowed.is_empty());
        assert!(list.requests.is_empty());
        assert_eq!(list.denied.len(), 1);
        assert_eq!(client.consent_calls.lock().clone(), vec![(vec![peer], false)]);
        assert_eq!(core.conversations().message_requests_count(&owner).unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_block_lands_locally_while_push_is_pending() {
        let client = MockClient::new();
        client.set_conversations(vec![convo("dm", &["0xA1", "0xB2"], 100)]);
        let core = Arc::new(core_with(client.clone()));
        let (owner, peer, topic) = (addr("0xA1"), addr("0xB2"), Topic::new("dm"));
        core.sync().refresh_conversations(&owner).await.unwrap();
        client.deny_gate.close();

        let handle = {
            let core = core.clone();
            let (owner, topic) = (owner.clone(), topic.clone());
            tokio::spawn(async move { core.block_conversation(&owner, &topic).await })
        };
        settle().await;

        assert_eq!(client.consent_calls.lock().len(), 1);
        assert_eq!(core.initial_consent_state(&owner, &topic).unwrap(), ConsentState::Denied);
        assert_eq!(
            core.consent().get_consent(&owner, &ConsentSubject::Peer(peer)).unwrap(),
            ConsentState::Denied
        );
        let list = core.conversations().latest().unwrap();
        assert!(list.requests.is_empty());
        assert_eq!(list.denied.len(), 1);
        assert_eq!(core.conversations().message_requests_count(&owner).unwrap(), Some(0));

        client.deny_gate.release(1);
        let outcome = handle.await.unwrap().unwrap();
        assert!(!outcome.is_diverged());
    }

    #[tokio::test]
    async fn test_allow_group_forwards_every_member() {
        let client = MockClient::new();
        client.set_conversations(vec![convo("g", &["0xA1", "0xB2", "0xC3"], 100)]);
        let core = core_with(client.clone());
        let owner = addr("0xA1");
        core.sync().refresh_conversations(&owner).await.unwrap();

        core.allow_conversation(&owner, &Topic::new("g")).await.unwrap();

        assert_eq!(
            client.consent_calls.lock().clone(),
            vec![(vec![addr("0xB2"), addr("0xC3")], true)]
        );
        assert_eq!(core.conversations().latest().unwrap().allowed.len(), 1);
        // Group consent does not touch the members' own records
        assert_eq!(
            core.consent().get_consent(&owner, &ConsentSubject::Peer(addr("0xB2"))).unwrap(),
            ConsentState::Unknown
        );
    }

    #[tokio::test]
    async fn test_clear_all_resets_state() {
        let core = core_with(MockClient::new());
        let (owner, topic) = (addr("0xA1"), Topic::new("t"));
        core.drafts().save_draft_text(&owner, &topic, "hi").unwrap();

        // Never listed, so there is nobody to push to
        let outcome = core.block_conversation(&owner, &topic).await.unwrap();
        assert_eq!(outcome.state, ConsentState::Denied);
        assert!(matches!(outcome.remote, Err(Error::ConversationNotFound(_))));
        assert_eq!(core.consent().divergences().len(), 1);

        core.clear_all().unwrap();
        core.clear_all().unwrap();

        assert_eq!(core.drafts().get_draft_text(&owner, &topic).unwrap(), None);
        assert_eq!(core.initial_consent_state(&owner, &topic).unwrap(), ConsentState::Unknown);
        assert!(core.consent().divergences().is_empty());
    }
}
