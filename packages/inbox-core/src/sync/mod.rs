//! # Sync Module
//!
//! Orders screen-level work against the messaging client: refetch on focus,
//! serialized sends with optimistic reordering, and conversation list
//! refreshes.
//!
//! ## Screen State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SCREEN STATE MACHINE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │            on_focus                          ok / error / blur          │
//! │   ┌──────┐ ─────────────► ┌────────────┐ ─────────────────► ┌──────┐   │
//! │   │ Idle │                │ Refetching │                    │ Idle │   │
//! │   └──────┘ ─────────────► ┌────────────┐ ─────────────────► └──────┘   │
//! │            send           │  Sending   │  ok: draft cleared,          │
//! │                           └────────────┘      list reordered           │
//! │                                              error: draft kept         │
//! │                                                                         │
//! │  A failed refetch is logged and left for the next focus.               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Send Queue
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SEND QUEUE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  send(topic, a) ─┐                                                      │
//! │  send(topic, b) ─┼─► mpsc (per topic) ─► worker task ─► client.send    │
//! │  send(topic, c) ─┘                         one job at a time, FIFO     │
//! │        ▲                                        │                       │
//! │        └────────── oneshot reply ◄──────────────┘                       │
//! │                                                                         │
//! │  The worker owns each job. Dropping the caller's future, or blurring   │
//! │  the screen, does not cancel a send already queued. The worker exits   │
//! │  once its queue drains; a blurred screen with nothing queued is        │
//! │  released.                                                             │
//! │                                                                         │
//! │  Image: encrypt_attachment ─► uploader.upload ─► send RemoteAttachment │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod scope;

pub use scope::FocusScope;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::address::{Address, Topic};
use crate::client::{BlobUploader, MessageContent, MessagingClient, RemoteAttachment, RemoteMessage};
use crate::consent::ConsentCache;
use crate::conversations::{ConversationIndex, ConversationList, SearchSections};
use crate::drafts::DraftStore;
use crate::error::{Error, Result};
use crate::CoreConfig;

/// Where a conversation screen is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    /// Nothing in flight
    Idle,
    /// Message refetch in flight
    Refetching,
    /// At least one send queued or in flight
    Sending,
}

/// What the user is sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    /// Text message; the text draft is cleared on success
    Text(String),
    /// Local image; the image draft is cleared on success
    Image {
        /// Path of the file on device
        local_path: String,
        /// MIME type, when known
        mime_type: Option<String>,
    },
}

impl OutgoingContent {
    fn validate(&self) -> Result<()> {
        let blank = match self {
            OutgoingContent::Text(text) => text.trim().is_empty(),
            OutgoingContent::Image { local_path, .. } => local_path.trim().is_empty(),
        };
        if blank {
            return Err(Error::EmptyMessage);
        }
        Ok(())
    }
}

/// A confirmed send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Conversation the message went to
    pub topic: Topic,
    /// Unix ms recorded after the client confirmed
    pub sent_at: i64,
    /// Preview used for the list
    pub preview: String,
    /// The conversation was moved up in the last merged list
    pub reordered: bool,
    /// Result of clearing the draft after the send
    pub draft_cleanup: Result<()>,
}

/// Result of a focus refetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefetchOutcome {
    /// New page stored, with this many messages
    Updated(usize),
    /// Fetch failed; the previous page is kept
    Failed(Error),
    /// Screen lost focus before the fetch finished; result dropped
    Cancelled,
}

struct SendJob {
    owner: Address,
    content: OutgoingContent,
    reply: oneshot::Sender<Result<SendReceipt>>,
}

#[derive(Debug, Default)]
struct Activity {
    refetches: usize,
    sends: usize,
}

/// Per-topic screen bookkeeping
struct ScreenSlot {
    /// In-flight counters, shared with the send worker
    activity: Arc<Mutex<Activity>>,
    /// Last good message page
    messages: RwLock<Vec<RemoteMessage>>,
    /// Cancels display refreshes on blur
    scope: Arc<FocusScope>,
    /// Send queue, present while a worker is running
    queue: Mutex<Option<mpsc::UnboundedSender<SendJob>>>,
    /// Screen is on display
    focused: AtomicBool,
}

type Slots = Arc<Mutex<HashMap<Topic, Arc<ScreenSlot>>>>;

impl ScreenSlot {
    fn new() -> Self {
        Self {
            activity: Arc::new(Mutex::new(Activity::default())),
            messages: RwLock::new(Vec::new()),
            scope: Arc::new(FocusScope::new()),
            queue: Mutex::new(None),
            focused: AtomicBool::new(false),
        }
    }

    /// Nothing would be lost by dropping this slot
    fn is_releasable(&self) -> bool {
        !self.focused.load(Ordering::SeqCst)
            && self.activity.lock().sends == 0
            && self.queue.lock().is_none()
    }

    fn state(&self) -> ScreenState {
        let activity = self.activity.lock();
        if activity.sends > 0 {
            ScreenState::Sending
        } else if activity.refetches > 0 {
            ScreenState::Refetching
        } else {
            ScreenState::Idle
        }
    }
}

/// Drops the refetch count when the refetch ends, however it ends
struct RefetchGuard(Arc<Mutex<Activity>>);

impl RefetchGuard {
    fn enter(activity: &Arc<Mutex<Activity>>) -> Self {
        activity.lock().refetches += 1;
        Self(activity.clone())
    }
}

impl Drop for RefetchGuard {
    fn drop(&mut self) {
        let mut activity = self.0.lock();
        activity.refetches = activity.refetches.saturating_sub(1);
    }
}

/// What a send worker needs
struct Delivery {
    client: Arc<dyn MessagingClient>,
    uploader: Arc<dyn BlobUploader>,
    drafts: Arc<DraftStore>,
    index: Arc<ConversationIndex>,
}

impl Delivery {
    async fn deliver(&self, topic: &Topic, owner: &Address, content: OutgoingContent) -> Result<SendReceipt> {
        let (message, is_image) = match content {
            OutgoingContent::Text(text) => (MessageContent::Text(text), false),
            OutgoingContent::Image {
                local_path,
                mime_type,
            } => (
                self.prepare_attachment(&local_path, mime_type.as_deref()).await?,
                true,
            ),
        };

        self.client.send(topic, &message).await?;

        let sent_at = crate::time::now_timestamp_millis();
        let preview = message.preview();
        let draft_cleanup = if is_image {
            self.drafts.clear_draft_image(owner, topic)
        } else {
            self.drafts.clear_draft_text(owner, topic)
        };
        if let Err(e) = &draft_cleanup {
            tracing::error!("Sent to {} but could not clear the draft: {}", topic, e);
        }
        let reordered = self.index.bump(topic, sent_at, &preview);

        tracing::info!("Message sent to {}", topic);
        Ok(SendReceipt {
            topic: topic.clone(),
            sent_at,
            preview,
            reordered,
            draft_cleanup,
        })
    }

    async fn prepare_attachment(&self, local_path: &str, mime_type: Option<&str>) -> Result<MessageContent> {
        let encrypted = self.client.encrypt_attachment(local_path, mime_type).await?;
        let url = self
            .uploader
            .upload(&encrypted.encrypted_local_path, &encrypted.metadata.filename)
            .await?;

        tracing::debug!("Attachment {} uploaded", encrypted.metadata.filename);
        Ok(MessageContent::RemoteAttachment(RemoteAttachment {
            scheme: url_scheme(&url),
            url,
            metadata: encrypted.metadata,
        }))
    }
}

fn url_scheme(url: &str) -> String {
    match url.find("://") {
        Some(end) => url[..end + 3].to_string(),
        None => "https://".to_string(),
    }
}

/// Next queued job, or `None` after closing the queue
///
/// Senders enqueue while holding `slot.queue`, so a queue found empty under
/// that lock stays empty.
fn next_job(slot: &ScreenSlot, jobs: &mut mpsc::UnboundedReceiver<SendJob>) -> Option<SendJob> {
    if let Ok(job) = jobs.try_recv() {
        return Some(job);
    }
    let mut queue = slot.queue.lock();
    match jobs.try_recv() {
        Ok(job) => Some(job),
        Err(_) => {
            *queue = None;
            None
        }
    }
}

fn release_if_idle(slots: &Slots, topic: &Topic, slot: &Arc<ScreenSlot>) {
    let mut slots = slots.lock();
    let current = matches!(slots.get(topic), Some(s) if Arc::ptr_eq(s, slot));
    if current && slot.is_releasable() {
        slots.remove(topic);
        tracing::debug!("Released screen state for {}", topic);
    }
}

async fn run_send_queue(
    topic: Topic,
    slot: Arc<ScreenSlot>,
    slots: Slots,
    delivery: Arc<Delivery>,
    mut jobs: mpsc::UnboundedReceiver<SendJob>,
) {
    while let Some(job) = next_job(&slot, &mut jobs) {
        let result = delivery.deliver(&topic, &job.owner, job.content).await;
        if let Err(e) = &result {
            tracing::warn!("Send to {} failed, draft kept: {}", topic, e);
        }

        {
            let mut activity = slot.activity.lock();
            activity.sends = activity.sends.saturating_sub(1);
        }
        // The caller may have gone away; the outcome is already applied
        let _ = job.reply.send(result);
    }
    tracing::debug!("Send queue for {} drained", topic);
    release_if_idle(&slots, &topic, &slot);
}

/// Coordinates screens with the messaging client
pub struct SyncCoordinator {
    /// Messaging client
    client: Arc<dyn MessagingClient>,
    /// Consent reconciliation before list refreshes
    consent: Arc<ConsentCache>,
    /// Conversation list projection
    index: Arc<ConversationIndex>,
    /// Send workers' shared dependencies
    delivery: Arc<Delivery>,
    /// Conversation screens by topic
    slots: Slots,
    /// Scope of the conversation list screen
    list_scope: Arc<FocusScope>,
    /// Messages fetched per focus
    page_size: usize,
    /// Recents shown by search
    recents_limit: usize,
}

impl SyncCoordinator {
    /// Create a coordinator
    pub fn new(
        config: &CoreConfig,
        client: Arc<dyn MessagingClient>,
        uploader: Arc<dyn BlobUploader>,
        consent: Arc<ConsentCache>,
        index: Arc<ConversationIndex>,
        drafts: Arc<DraftStore>,
    ) -> Self {
        Self {
            client: client.clone(),
            consent,
            index: index.clone(),
            delivery: Arc::new(Delivery {
                client,
                uploader,
                drafts,
                index,
            }),
            slots: Arc::new(Mutex::new(HashMap::new())),
            list_scope: Arc::new(FocusScope::new()),
            page_size: config.message_page_size,
            recents_limit: config.recents_limit,
        }
    }

    /// Slot for `topic`, with `claim` run before a blur can release it
    fn slot_with<R>(&self, topic: &Topic, claim: impl FnOnce(&ScreenSlot) -> R) -> (Arc<ScreenSlot>, R) {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(ScreenSlot::new()))
            .clone();
        let claimed = claim(&slot);
        (slot, claimed)
    }

    /// Current state of a conversation screen
    pub fn state(&self, topic: &Topic) -> ScreenState {
        self.slots
            .lock()
            .get(topic)
            .map(|slot| slot.state())
            .unwrap_or(ScreenState::Idle)
    }

    /// Last good message page for a conversation
    ///
    /// Kept while the screen is focused or has sends in flight.
    pub fn messages(&self, topic: &Topic) -> Vec<RemoteMessage> {
        self.slots
            .lock()
            .get(topic)
            .map(|slot| slot.messages.read().clone())
            .unwrap_or_default()
    }

    /// Scope that a conversation screen's display refreshes run under
    pub fn scope(&self, topic: &Topic) -> Arc<FocusScope> {
        self.slot_with(topic, |_| ()).0.scope.clone()
    }

    /// Queue a send and wait for its outcome
    ///
    /// Sends to the same topic complete in call order. The send keeps going
    /// if this future is dropped.
    pub async fn send(
        &self,
        owner: &Address,
        topic: &Topic,
        content: OutgoingContent,
    ) -> Result<SendReceipt> {
        content.validate()?;

        let (slot, ()) = self.slot_with(topic, |slot| slot.activity.lock().sends += 1);
        let (reply, receipt) = oneshot::channel();
        {
            let mut queue = slot.queue.lock();
            let sender = queue.get_or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_send_queue(
                    topic.clone(),
                    slot.clone(),
                    self.slots.clone(),
                    self.delivery.clone(),
                    rx,
                ));
                tx
            });

            let job = SendJob {
                owner: owner.clone(),
                content,
                reply,
            };
            if sender.send(job).is_err() {
                slot.activity.lock().sends -= 1;
                *queue = None;
                return Err(Error::Internal(format!("send queue for {} is closed", topic)));
            }
        }

        receipt
            .await
            .map_err(|_| Error::Internal("send worker dropped the reply".into()))?
    }

    /// Refetch a conversation's messages as its screen gains focus
    ///
    /// Never returns an error. A failure leaves the previous page in place
    /// for the next focus to retry.
    pub async fn on_focus(&self, topic: &Topic) -> RefetchOutcome {
        let (slot, (epoch, _refetching)) = self.slot_with(topic, |slot| {
            slot.focused.store(true, Ordering::SeqCst);
            (slot.scope.epoch(), RefetchGuard::enter(&slot.activity))
        });

        let fetched = tokio::select! {
            result = self.client.list_messages(topic, self.page_size) => Some(result),
            _ = slot.scope.cancelled(epoch) => None,
        };

        match fetched {
            Some(Ok(messages)) if slot.scope.epoch() == epoch => {
                let count = messages.len();
                *slot.messages.write() = messages;
                tracing::debug!("Refetched {} message(s) for {}", count, topic);
                RefetchOutcome::Updated(count)
            }
            Some(Err(e)) => {
                tracing::warn!("Message refetch for {} failed: {}", topic, e);
                RefetchOutcome::Failed(e)
            }
            Some(Ok(_)) | None => {
                tracing::debug!("Message refetch for {} cancelled", topic);
                RefetchOutcome::Cancelled
            }
        }
    }

    /// The conversation screen lost focus; display refreshes stop
    ///
    /// The screen's state is released now if nothing is queued, otherwise
    /// when its send queue drains.
    pub fn on_blur(&self, topic: &Topic) {
        let mut slots = self.slots.lock();
        let release = match slots.get(topic) {
            Some(slot) => {
                slot.scope.cancel();
                slot.focused.store(false, Ordering::SeqCst);
                slot.is_releasable()
            }
            None => false,
        };
        if release {
            slots.remove(topic);
            tracing::debug!("Released screen state for {}", topic);
        }
    }

    /// Reconcile consent, then refetch and merge the conversation list
    ///
    /// Returns `None` if the list screen blurred meanwhile. A consent list
    /// failure is logged and the merge goes ahead with local consent.
    pub async fn refresh_conversations(&self, owner: &Address) -> Result<Option<ConversationList>> {
        let epoch = self.list_scope.epoch();

        let work = async {
            if let Err(e) = self.consent.refresh_from_remote(owner).await {
                tracing::warn!("Consent list refresh failed, using local consent: {}", e);
            }
            self.index.refresh_scoped(owner, &self.list_scope).await
        };

        tokio::select! {
            result = work => result.map(Some),
            _ = self.list_scope.cancelled(epoch) => Ok(None),
        }
    }

    /// The conversation list screen lost focus
    pub fn on_list_blur(&self) {
        self.list_scope.cancel();
    }

    /// Search sections for `query`
    ///
    /// Contacts come from the remote consent list; if it cannot be fetched
    /// only recents are offered.
    pub async fn search(&self, owner: &Address, query: &str) -> Result<SearchSections> {
        let allowed = match self.consent.refresh_from_remote(owner).await {
            Ok(report) => report.allowed_peers,
            Err(e) => {
                tracing::warn!("Consent list unavailable for search: {}", e);
                Vec::new()
            }
        };
        self.index.search(owner, query, &allowed, self.recents_limit)
    }
}

// ============================================================================
// TESTS
// ============================================================================
