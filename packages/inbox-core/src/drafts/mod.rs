//! # Drafts Module
//!
//! Unsent text and image staging, one slot of each per (owner, topic).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           DRAFT LIFECYCLE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  keystroke ──► save_draft_text(owner, topic, text)   overwrite         │
//! │  pick image ─► save_draft_image(owner, topic, uri)   overwrite         │
//! │                                                                         │
//! │  send ok    ──► clear_draft_*                         exactly once     │
//! │  send error ──► nothing                               draft survives   │
//! │                                                                         │
//! │  DRAFT_TEXT_<owner>_<topic>     DRAFT_IMAGE_<owner>_<topic>            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use crate::address::{Address, Topic};
use crate::error::Result;
use crate::storage::{KeyValueStore, StorageKey};

/// Everything staged for one conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftEntry {
    /// Unsent text
    pub text: Option<String>,
    /// Local URI of an unsent image
    pub image_uri: Option<String>,
}

impl DraftEntry {
    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image_uri.is_none()
    }
}

/// Per-conversation draft persistence
pub struct DraftStore {
    store: Arc<dyn KeyValueStore>,
}

impl DraftStore {
    /// Create a draft store over `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stage text, replacing any earlier text
    pub fn save_draft_text(&self, owner: &Address, topic: &Topic, text: &str) -> Result<()> {
        self.store.set(&StorageKey::draft_text(owner, topic), text.into())
    }

    /// Staged text, if any
    pub fn get_draft_text(&self, owner: &Address, topic: &Topic) -> Result<Option<String>> {
        self.store.get_string(&StorageKey::draft_text(owner, topic))
    }

    /// Drop staged text
    pub fn clear_draft_text(&self, owner: &Address, topic: &Topic) -> Result<()> {
        self.store.delete(&StorageKey::draft_text(owner, topic))
    }

    /// Stage an image, replacing any earlier image
    pub fn save_draft_image(&self, owner: &Address, topic: &Topic, uri: &str) -> Result<()> {
        self.store.set(&StorageKey::draft_image(owner, topic), uri.into())
    }

    /// Staged image URI, if any
    pub fn get_draft_image(&self, owner: &Address, topic: &Topic) -> Result<Option<String>> {
        self.store.get_string(&StorageKey::draft_image(owner, topic))
    }

    /// Drop the staged image
    pub fn clear_draft_image(&self, owner: &Address, topic: &Topic) -> Result<()> {
        self.store.delete(&StorageKey::draft_image(owner, topic))
    }

    /// Both slots for a conversation
    pub fn draft(&self, owner: &Address, topic: &Topic) -> Result<DraftEntry> {
        Ok(DraftEntry {
            text: self.get_draft_text(owner, topic)?,
            image_uri: self.get_draft_image(owner, topic)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;
    use crate::testing::{addr, FlakyStore};
    use std::sync::atomic::Ordering;

    fn drafts() -> DraftStore {
        DraftStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_text_round_trip() {
        let drafts = drafts();
        let (owner, topic) = (addr("0xA1"), Topic::new("t1"));

        drafts.save_draft_text(&owner, &topic, "hi").unwrap();
        assert_eq!(drafts.get_draft_text(&owner, &topic).unwrap().as_deref(), Some("hi"));

        drafts.clear_draft_text(&owner, &topic).unwrap();
        assert_eq!(drafts.get_draft_text(&owner, &topic).unwrap(), None);
    }

    #[test]
    fn test_empty_text_is_not_absent() {
        let drafts = drafts();
        let (owner, topic) = (addr("0xA1"), Topic::new("t1"));

        drafts.save_draft_text(&owner, &topic, "").unwrap();
        assert_eq!(drafts.get_draft_text(&owner, &topic).unwrap(), Some(String::new()));
    }

    #[test]
    fn test_owners_do_not_share_drafts() {
        let drafts = drafts();
        let topic = Topic::new("t1");

        drafts.save_draft_text(&addr("0xA1"), &topic, "mine").unwrap();
        drafts.save_draft_image(&addr("0xA1"), &topic, "file:///a.png").unwrap();

        assert!(drafts.draft(&addr("0xC3"), &topic).unwrap().is_empty());
    }

    #[test]
    fn test_slots_are_independent() {
        let drafts = drafts();
        let (owner, topic) = (addr("0xA1"), Topic::new("t1"));

        drafts.save_draft_text(&owner, &topic, "caption").unwrap();
        drafts.save_draft_image(&owner, &topic, "file:///a.png").unwrap();
        drafts.clear_draft_image(&owner, &topic).unwrap();

        assert_eq!(
            drafts.draft(&owner, &topic).unwrap(),
            DraftEntry {
                text: Some("caption".into()),
                image_uri: None,
            }
        );
    }

    #[test]
    fn test_store_failure_surfaces() {
        let store = Arc::new(FlakyStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);
        let drafts = DraftStore::new(store);

        let result = drafts.save_draft_text(&addr("0xA1"), &Topic::new("t1"), "hi");
        assert!(matches!(result, Err(Error::StorageWriteError(_))));
    }
}
