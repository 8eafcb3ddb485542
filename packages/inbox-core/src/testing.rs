//! Scripted doubles for the remote collaborators and the store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::address::{Address, Topic};
use crate::client::{
    AttachmentMetadata, BlobUploader, DisplayInfo, EncryptedAttachment, MessageContent,
    MessagingClient, RemoteConsent, RemoteConversation, RemoteMessage, RemotePermission,
};
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, MemoryStore, StorageKey, StoreValue};

pub(crate) fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

pub(crate) fn convo(id: &str, participants: &[&str], last_message_time: i64) -> RemoteConversation {
    RemoteConversation {
        id: Topic::new(id),
        participants: participants.iter().map(|p| addr(p)).collect(),
        last_message_time,
        last_message_preview: format!("latest in {}", id),
    }
}

/// Let spawned tasks run on the current-thread test runtime
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// A closed gate that tests open one call at a time
#[derive(Default)]
pub(crate) struct Gate {
    permits: Mutex<Option<Arc<Semaphore>>>,
}

impl Gate {
    pub(crate) fn close(&self) {
        *self.permits.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self, n: usize) {
        if let Some(sem) = self.permits.lock().as_ref() {
            sem.add_permits(n);
        }
    }

    async fn pass(&self) {
        let sem = self.permits.lock().clone();
        if let Some(sem) = sem {
            sem.acquire().await.unwrap().forget();
        }
    }
}

#[derive(Default)]
pub(crate) struct MockClient {
    pub conversations: Mutex<Vec<RemoteConversation>>,
    pub messages: Mutex<HashMap<Topic, Vec<RemoteMessage>>>,
    pub consent: Mutex<Vec<RemoteConsent>>,
    pub display: Mutex<HashMap<Address, DisplayInfo>>,

    pub fail_list: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_consent: AtomicBool,
    pub fail_resolve: AtomicBool,
    pub fail_encrypt: AtomicBool,

    pub list_gate: Gate,
    pub send_gate: Gate,
    pub resolve_gate: Gate,
    /// Holds consent pushes that deny
    pub deny_gate: Gate,

    pub list_calls: AtomicUsize,
    pub message_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
    pub sent: Mutex<Vec<(Topic, MessageContent)>>,
    pub consent_calls: Mutex<Vec<(Vec<Address>, bool)>>,
}

impl MockClient {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_conversations(&self, list: Vec<RemoteConversation>) {
        *self.conversations.lock() = list;
    }

    pub(crate) fn set_display(&self, address: &str, name: Option<&str>, avatar: Option<&str>) {
        self.display.lock().insert(
            addr(address),
            DisplayInfo {
                display_name: name.map(str::to_string),
                avatar_url: avatar.map(str::to_string),
            },
        );
    }

    pub(crate) fn set_remote_consent(&self, peer: &str, permission: RemotePermission) {
        self.consent.lock().push(RemoteConsent {
            peer: addr(peer),
            permission,
        });
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, c)| match c {
                MessageContent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingClient for MockClient {
    async fn list_conversations(&self) -> Result<Vec<RemoteConversation>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_gate.pass().await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::RemoteListFailed("network unreachable".into()));
        }
        Ok(self.conversations.lock().clone())
    }

    async fn list_messages(&self, conversation: &Topic, limit: usize) -> Result<Vec<RemoteMessage>> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        self.list_gate.pass().await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::RemoteListFailed("network unreachable".into()));
        }
        let mut page = self
            .messages
            .lock()
            .get(conversation)
            .cloned()
            .unwrap_or_default();
        page.truncate(limit);
        Ok(page)
    }

    async fn send(&self, conversation: &Topic, content: &MessageContent) -> Result<()> {
        self.send_gate.pass().await;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::SendFailed("publish rejected".into()));
        }
        self.sent.lock().push((conversation.clone(), content.clone()));
        Ok(())
    }

    async fn set_consent(&self, peers: &[Address], allowed: bool) -> Result<()> {
        self.consent_calls.lock().push((peers.to_vec(), allowed));
        if !allowed {
            self.deny_gate.pass().await;
        }
        if self.fail_consent.load(Ordering::SeqCst) {
            return Err(Error::ConsentSyncFailed("contacts api down".into()));
        }
        Ok(())
    }

    async fn consent_list(&self) -> Result<Vec<RemoteConsent>> {
        self.list_gate.pass().await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::RemoteListFailed("network unreachable".into()));
        }
        Ok(self.consent.lock().clone())
    }

    async fn resolve_display_info(&self, address: &Address) -> Result<DisplayInfo> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.resolve_gate.pass().await;
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(Error::ResolveFailed("ens lookup failed".into()));
        }
        Ok(self.display.lock().get(address).cloned().unwrap_or_default())
    }

    async fn encrypt_attachment(
        &self,
        local_path: &str,
        _mime_type: Option<&str>,
    ) -> Result<EncryptedAttachment> {
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(Error::AttachmentFailed("cannot read file".into()));
        }
        let filename = local_path.rsplit('/').next().unwrap_or(local_path).to_string();
        Ok(EncryptedAttachment {
            encrypted_local_path: format!("{}.enc", local_path),
            metadata: AttachmentMetadata {
                filename,
                content_digest: "digest".into(),
                secret: "secret".into(),
                salt: "salt".into(),
                nonce: "nonce".into(),
                content_length: Some(1024),
            },
        })
    }
}

#[derive(Default)]
pub(crate) struct MockUploader {
    pub fail: AtomicBool,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl MockUploader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BlobUploader for MockUploader {
    async fn upload(&self, local_path: &str, filename: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::UploadFailed("bucket unavailable".into()));
        }
        self.uploads
            .lock()
            .push((local_path.to_string(), filename.to_string()));
        Ok(format!("https://blobs.example.com/{}", filename))
    }
}

/// A store whose writes can be switched off
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StorageWriteError("disk full".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for FlakyStore {
    fn set(&self, key: &StorageKey, value: StoreValue) -> Result<()> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn get(&self, key: &StorageKey) -> Result<Option<StoreValue>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &StorageKey) -> Result<()> {
        self.check()?;
        self.inner.delete(key)
    }

    fn clear_all(&self) -> Result<()> {
        self.check()?;
        self.inner.clear_all()
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }
}
