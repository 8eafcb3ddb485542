//! # Error Handling
//!
//! Error types for Inbox Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Core Errors                                                       │
//! │  │   └── InvalidConfig         - Configuration rejected                │
//! │  │                                                                      │
//! │  ├── Storage Errors (persistence unavailable - fatal to the feature)   │
//! │  │   ├── StorageReadError      - Failed to read from the store         │
//! │  │   ├── StorageWriteError     - Failed to write to the store          │
//! │  │   ├── StorageCorrupted      - Stored value has the wrong shape      │
//! │  │   ├── DatabaseError         - SQLite failure                        │
//! │  │   └── InvalidStorageKey     - Key does not decode                   │
//! │  │                                                                      │
//! │  ├── Remote Errors (transient - retried on the next user action)       │
//! │  │   ├── RemoteListFailed      - Conversation/message list failed      │
//! │  │   ├── SendFailed            - Message send failed                   │
//! │  │   ├── ConsentSyncFailed     - Remote consent update failed          │
//! │  │   ├── ResolveFailed         - Display info lookup failed            │
//! │  │   ├── UploadFailed          - Blob upload failed                    │
//! │  │   └── AttachmentFailed      - Attachment encryption failed          │
//! │  │                                                                      │
//! │  ├── Consent Errors                                                    │
//! │  │   └── StaleConsentFetch     - Ticket superseded by a newer fetch    │
//! │  │                                                                      │
//! │  └── Conversation Errors                                               │
//! │      ├── InvalidAddress        - Address is empty or malformed         │
//! │      ├── EmptyMessage          - Nothing to send                       │
//! │      └── ConversationNotFound  - Unknown topic                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Absent keys and unknown contacts are not errors. They come back as
//! `None` (or a fallback value) and callers render accordingly.

use thiserror::Error;

/// Result type alias for Inbox Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Inbox Core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Core Errors (100-199)
    // ========================================================================

    /// Configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// A stored value could not be interpreted
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A raw key did not decode into a storage key
    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    // ========================================================================
    // Remote Errors (500-599)
    // ========================================================================

    /// Listing conversations or messages failed
    #[error("Failed to list from the messaging client: {0}")]
    RemoteListFailed(String),

    /// Sending a message failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Pushing a consent change to the messaging client failed
    #[error("Failed to sync consent: {0}")]
    ConsentSyncFailed(String),

    /// Display info lookup failed
    #[error("Failed to resolve display info: {0}")]
    ResolveFailed(String),

    /// Blob upload failed
    #[error("Failed to upload attachment: {0}")]
    UploadFailed(String),

    /// Attachment encryption failed
    #[error("Failed to prepare attachment: {0}")]
    AttachmentFailed(String),

    // ========================================================================
    // Consent Errors (600-699)
    // ========================================================================

    /// A consent fetch ticket was superseded by a newer fetch
    #[error("Consent fetch superseded by a newer fetch.")]
    StaleConsentFetch,

    // ========================================================================
    // Conversation Errors (700-799)
    // ========================================================================

    /// Address is empty or malformed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Nothing to send
    #[error("Message has no content.")]
    EmptyMessage,

    /// Conversation not found
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Core
    /// - 400-499: Storage
    /// - 500-599: Remote
    /// - 600-699: Consent
    /// - 700-799: Conversations
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Core (100-199)
            Error::InvalidConfig(_) => 100,

            // Storage (400-499)
            Error::StorageReadError(_) => 401,
            Error::StorageWriteError(_) => 402,
            Error::StorageCorrupted(_) => 404,
            Error::DatabaseError(_) => 405,
            Error::InvalidStorageKey(_) => 406,

            // Remote (500-599)
            Error::RemoteListFailed(_) => 500,
            Error::SendFailed(_) => 501,
            Error::ConsentSyncFailed(_) => 502,
            Error::ResolveFailed(_) => 503,
            Error::UploadFailed(_) => 504,
            Error::AttachmentFailed(_) => 505,

            // Consent (600-699)
            Error::StaleConsentFetch => 600,

            // Conversations (700-799)
            Error::InvalidAddress(_) => 700,
            Error::EmptyMessage => 701,
            Error::ConversationNotFound(_) => 702,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 902,
        }
    }

    /// A remote call failed; retry on the next user-triggered action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RemoteListFailed(_)
                | Error::SendFailed(_)
                | Error::ConsentSyncFailed(_)
                | Error::ResolveFailed(_)
                | Error::UploadFailed(_)
                | Error::AttachmentFailed(_)
        )
    }

    /// The store is unusable and durability can no longer be promised
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Error::StorageReadError(_)
                | Error::StorageWriteError(_)
                | Error::StorageCorrupted(_)
                | Error::DatabaseError(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidConfig("x".into()).code(), 100);
        assert_eq!(Error::StorageWriteError("disk".into()).code(), 402);
        assert_eq!(Error::RemoteListFailed("offline".into()).code(), 500);
        assert_eq!(Error::StaleConsentFetch.code(), 600);
        assert_eq!(Error::EmptyMessage.code(), 701);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::SendFailed("timeout".into()).is_transient());
        assert!(Error::ResolveFailed("dns".into()).is_transient());
        assert!(!Error::StorageWriteError("full".into()).is_transient());
        assert!(!Error::EmptyMessage.is_transient());
    }

    #[test]
    fn test_persistence_failures() {
        assert!(Error::DatabaseError("locked".into()).is_persistence_failure());
        assert!(Error::StorageCorrupted("bad kind".into()).is_persistence_failure());
        assert!(!Error::UploadFailed("503".into()).is_persistence_failure());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::SerializationError(_)));
        assert_eq!(err.code(), 902);
    }
}
