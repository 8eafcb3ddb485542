//! # Remote Collaborators
//!
//! Narrow async interfaces to the messaging SDK and the blob store. The
//! protocol, key management and attachment encryption live behind these
//! traits; this crate only calls them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        REMOTE INTERFACES                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  MessagingClient                         BlobUploader                  │
//! │  ───────────────                         ────────────                  │
//! │  list_conversations()  ─► index          upload(path, name) ─► URL     │
//! │  list_messages(id, n)  ─► focus refetch                                │
//! │  send(id, content)     ─► send queue                                   │
//! │  set_consent(peers, b) ─► consent cache                                │
//! │  consent_list()        ─► reconciliation                               │
//! │  resolve_display_info  ─► contact cache                                │
//! │  encrypt_attachment    ─► image send                                   │
//! │                                                                         │
//! │  Every call may suspend and may fail. No timeouts are applied here.   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::{Address, Topic};
use crate::error::Result;

/// A conversation or group as reported by the messaging client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConversation {
    /// Conversation topic
    pub id: Topic,
    /// Participant addresses (may include the owner)
    pub participants: Vec<Address>,
    /// Unix ms of the newest message, or creation time when empty
    pub last_message_time: i64,
    /// Text preview of the newest message
    pub last_message_preview: String,
}

/// A message as reported by the messaging client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    /// Message id
    pub id: String,
    /// Sender address
    pub sender: Address,
    /// Unix ms when sent
    pub sent_at: i64,
    /// Payload
    pub content: MessageContent,
}

/// Remote consent permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemotePermission {
    /// Peer is allowed
    Allowed,
    /// Peer is denied
    Denied,
}

/// One entry of the remote consent list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConsent {
    /// Peer the permission applies to
    pub peer: Address,
    /// The permission
    pub permission: RemotePermission,
}

/// Display metadata for an address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayInfo {
    /// Human-readable name (ENS or profile)
    pub display_name: Option<String>,
    /// Avatar URL
    pub avatar_url: Option<String>,
}

/// Metadata produced by attachment encryption and needed to decrypt later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    /// Original filename
    pub filename: String,
    /// Digest of the encrypted payload
    pub content_digest: String,
    /// Encryption secret (encoded by the SDK)
    pub secret: String,
    /// Key derivation salt
    pub salt: String,
    /// Cipher nonce
    pub nonce: String,
    /// Encrypted payload length
    pub content_length: Option<u64>,
}

/// An encrypted file staged on local disk, ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedAttachment {
    /// Path of the encrypted file
    pub encrypted_local_path: String,
    /// Decryption metadata
    pub metadata: AttachmentMetadata,
}

/// Reference to an uploaded encrypted attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    /// URL scheme, e.g. `https://`
    pub scheme: String,
    /// Where the encrypted blob lives
    pub url: String,
    /// Decryption metadata
    pub metadata: AttachmentMetadata,
}

/// Payload handed to [`MessagingClient::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Uploaded encrypted attachment
    RemoteAttachment(RemoteAttachment),
}

impl MessageContent {
    /// Short text for conversation-list previews
    pub fn preview(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::RemoteAttachment(a) => a.metadata.filename.clone(),
        }
    }
}

/// The decentralized messaging client
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Conversations and groups, in the client's own order
    async fn list_conversations(&self) -> Result<Vec<RemoteConversation>>;

    /// The newest `limit` messages of a conversation, newest first
    async fn list_messages(&self, conversation: &Topic, limit: usize) -> Result<Vec<RemoteMessage>>;

    /// Send a message to a conversation
    async fn send(&self, conversation: &Topic, content: &MessageContent) -> Result<()>;

    /// Allow or deny a set of peers
    async fn set_consent(&self, peers: &[Address], allowed: bool) -> Result<()>;

    /// Every consent record the network knows for the current account
    async fn consent_list(&self) -> Result<Vec<RemoteConsent>>;

    /// Name and avatar for an address
    async fn resolve_display_info(&self, address: &Address) -> Result<DisplayInfo>;

    /// Encrypt a local file for upload
    async fn encrypt_attachment(
        &self,
        local_path: &str,
        mime_type: Option<&str>,
    ) -> Result<EncryptedAttachment>;
}

/// Remote blob store for attachments
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Upload a local file and return its public URL
    async fn upload(&self, local_path: &str, filename: &str) -> Result<String>;
}
