//! # Conversations Module
//!
//! Builds the list the conversation screen renders out of the remote
//! conversation list, local consent and contact display data.
//!
//! ## Merge Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MERGE PIPELINE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  client.list_conversations()                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐   same id seen again ─► replace in place          │
//! │  │  1. Dedup       │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           ▼                                                             │
//! │  ┌─────────────────┐   last_message_time desc, stable on ties          │
//! │  │  2. Sort        │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           ▼                                                             │
//! │  ┌─────────────────┐   consent: topic record, else the single peer     │
//! │  │  3. Enrich      │   title:   contact names or formatted addresses   │
//! │  └────────┬────────┘                                                   │
//! │           ▼                                                             │
//! │  ┌─────────────────┐   Allowed ─► allowed                              │
//! │  │  4. Partition   │   Unknown ─► requests                             │
//! │  │                 │   Denied  ─► denied (not in the default view)     │
//! │  └────────┬────────┘                                                   │
//! │           ▼                                                             │
//! │   TOPIC_ADDRESSES_<topic>, MESSAGE_REQUESTS_COUNT_<owner> persisted    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Summaries are a projection. They are rebuilt on every merge and never
//! read back from the store.

mod search;

pub use search::{build_sections, SearchContact, SearchSections};

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::address::{Address, ConsentSubject, Topic};
use crate::client::{MessagingClient, RemoteConversation};
use crate::consent::{ConsentCache, ConsentState};
use crate::contacts::ContactInfoCache;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, StorageKey};
use crate::sync::FocusScope;

/// Render-ready view of one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Conversation topic
    pub id: Topic,
    /// Everyone in the conversation, owner included when the client lists it
    pub participants: BTreeSet<Address>,
    /// Unix ms of the newest message
    pub last_message_time: i64,
    /// Preview of the newest message
    pub last_message_preview: String,
    /// Effective consent for the owner
    pub consent: ConsentState,
    /// Display title
    pub title: String,
}

impl ConversationSummary {
    /// Participants other than `owner`
    pub fn peers(&self, owner: &Address) -> Vec<Address> {
        self.participants
            .iter()
            .filter(|p| *p != owner)
            .cloned()
            .collect()
    }

    /// More than one peer
    pub fn is_group(&self, owner: &Address) -> bool {
        self.peers(owner).len() > 1
    }
}

/// Merged list split by consent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationList {
    /// Main list
    pub allowed: Vec<ConversationSummary>,
    /// Message requests
    pub requests: Vec<ConversationSummary>,
    /// Blocked conversations, hidden by default
    pub denied: Vec<ConversationSummary>,
}

impl ConversationList {
    fn partition(ordered: &[ConversationSummary]) -> Self {
        let mut list = ConversationList::default();
        for summary in ordered {
            match summary.consent {
                ConsentState::Allowed => list.allowed.push(summary.clone()),
                ConsentState::Unknown => list.requests.push(summary.clone()),
                ConsentState::Denied => list.denied.push(summary.clone()),
            }
        }
        list
    }

    /// Nothing in any partition
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.requests.is_empty() && self.denied.is_empty()
    }

    /// Entries across every partition
    pub fn len(&self) -> usize {
        self.allowed.len() + self.requests.len() + self.denied.len()
    }

    /// Find a conversation in any partition
    pub fn find(&self, id: &Topic) -> Option<&ConversationSummary> {
        self.allowed
            .iter()
            .chain(&self.requests)
            .chain(&self.denied)
            .find(|s| &s.id == id)
    }
}

/// Last merge result
struct Merged {
    owner: Address,
    ordered: Vec<ConversationSummary>,
}

/// The conversation list projection
pub struct ConversationIndex {
    /// Durable store
    store: Arc<dyn KeyValueStore>,
    /// Messaging client
    client: Arc<dyn MessagingClient>,
    /// Consent lookups
    consent: Arc<ConsentCache>,
    /// Display names
    contacts: Arc<ContactInfoCache>,
    /// Ordered output of the last merge
    latest: RwLock<Option<Merged>>,
}

impl ConversationIndex {
    /// Create a new index
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn MessagingClient>,
        consent: Arc<ConsentCache>,
        contacts: Arc<ContactInfoCache>,
    ) -> Self {
        Self {
            store,
            client,
            consent,
            contacts,
            latest: RwLock::new(None),
        }
    }

    /// Fetch the remote list and merge it
    ///
    /// A failed fetch is returned to the caller and the previous merge is
    /// left untouched.
    pub async fn refresh(&self, owner: &Address) -> Result<ConversationList> {
        self.refresh_inner(owner, None).await
    }

    /// [`refresh`](Self::refresh) with contact lookups tied to `scope`
    pub async fn refresh_scoped(
        &self,
        owner: &Address,
        scope: &FocusScope,
    ) -> Result<ConversationList> {
        self.refresh_inner(owner, Some(scope)).await
    }

    async fn refresh_inner(
        &self,
        owner: &Address,
        scope: Option<&FocusScope>,
    ) -> Result<ConversationList> {
        let remote = match self.client.list_conversations().await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!("Conversation list fetch failed: {}", e);
                return Err(e);
            }
        };
        self.merge_inner(owner, remote, scope)
    }

    /// Merge an already fetched remote list
    pub fn merge(&self, owner: &Address, remote: Vec<RemoteConversation>) -> Result<ConversationList> {
        self.merge_inner(owner, remote, None)
    }

    fn merge_inner(
        &self,
        owner: &Address,
        remote: Vec<RemoteConversation>,
        scope: Option<&FocusScope>,
    ) -> Result<ConversationList> {
        let received = remote.len();
        let mut ordered = dedup(remote);
        ordered.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));

        let mut summaries = Vec::with_capacity(ordered.len());
        for convo in ordered {
            let participants: BTreeSet<Address> = convo.participants.into_iter().collect();
            let peers: Vec<&Address> = participants.iter().filter(|p| *p != owner).collect();

            let consent = self.effective_consent(owner, &convo.id, &peers)?;
            let title = self.title_for(owner, &peers, scope)?;

            self.store.set(
                &StorageKey::topic_addresses(&convo.id),
                join_addresses(&participants).into(),
            )?;

            summaries.push(ConversationSummary {
                id: convo.id,
                participants,
                last_message_time: convo.last_message_time,
                last_message_preview: convo.last_message_preview,
                consent,
                title,
            });
        }

        let list = self.commit(owner, summaries)?;
        tracing::debug!(
            "Merged {} remote conversation(s) into {} ({} allowed, {} requests, {} denied)",
            received,
            list.len(),
            list.allowed.len(),
            list.requests.len(),
            list.denied.len()
        );
        Ok(list)
    }

    fn effective_consent(
        &self,
        owner: &Address,
        topic: &Topic,
        peers: &[&Address],
    ) -> Result<ConsentState> {
        let state = self
            .consent
            .get_consent(owner, &ConsentSubject::Conversation(topic.clone()))?;
        if state != ConsentState::Unknown {
            return Ok(state);
        }
        match peers {
            [peer] => self
                .consent
                .get_consent(owner, &ConsentSubject::Peer((*peer).clone())),
            _ => Ok(ConsentState::Unknown),
        }
    }

    fn title_for(
        &self,
        owner: &Address,
        peers: &[&Address],
        scope: Option<&FocusScope>,
    ) -> Result<String> {
        if peers.is_empty() {
            return Ok(owner.formatted());
        }

        let mut names = Vec::with_capacity(peers.len());
        for peer in peers {
            let info = match scope {
                Some(scope) => self.contacts.get_contact_info_scoped(peer, scope)?,
                None => self.contacts.get_contact_info(peer)?,
            };
            names.push(info.title());
        }
        Ok(names.join(", "))
    }

    fn commit(&self, owner: &Address, ordered: Vec<ConversationSummary>) -> Result<ConversationList> {
        let list = ConversationList::partition(&ordered);
        self.store.set(
            &StorageKey::message_requests_count(owner),
            (list.requests.len() as i64).into(),
        )?;
        *self.latest.write() = Some(Merged {
            owner: owner.clone(),
            ordered,
        });
        Ok(list)
    }

    /// Output of the last merge, if any
    pub fn latest(&self) -> Option<ConversationList> {
        self.latest
            .read()
            .as_ref()
            .map(|merged| ConversationList::partition(&merged.ordered))
    }

    /// Ordered entries of the last merge, partitions ignored
    pub fn latest_ordered(&self) -> Vec<ConversationSummary> {
        self.latest
            .read()
            .as_ref()
            .map(|merged| merged.ordered.clone())
            .unwrap_or_default()
    }

    /// Move a conversation up after a successful send
    ///
    /// Returns false when the conversation is not in the last merge; the
    /// next refresh will bring it in.
    pub fn bump(&self, id: &Topic, time: i64, preview: &str) -> bool {
        let mut latest = self.latest.write();
        let Some(merged) = latest.as_mut() else {
            return false;
        };
        let Some(pos) = merged.ordered.iter().position(|s| &s.id == id) else {
            return false;
        };

        let mut summary = merged.ordered.remove(pos);
        summary.last_message_time = summary.last_message_time.max(time);
        summary.last_message_preview = preview.to_string();

        let insert_at = merged
            .ordered
            .iter()
            .position(|s| s.last_message_time <= summary.last_message_time)
            .unwrap_or(merged.ordered.len());
        merged.ordered.insert(insert_at, summary);
        true
    }

    /// Recompute consent for the last merge without fetching
    ///
    /// Used after an allow/block so the partitions move at once.
    pub fn repartition(&self) -> Result<Option<ConversationList>> {
        let Some((owner, mut ordered)) = self
            .latest
            .read()
            .as_ref()
            .map(|m| (m.owner.clone(), m.ordered.clone()))
        else {
            return Ok(None);
        };

        for summary in &mut ordered {
            let peers = summary.peers(&owner);
            let peer_refs: Vec<&Address> = peers.iter().collect();
            summary.consent = self.effective_consent(&owner, &summary.id, &peer_refs)?;
        }

        self.commit(&owner, ordered).map(Some)
    }

    /// Forget the last merge
    pub fn reset(&self) {
        *self.latest.write() = None;
    }

    /// Request count from the last merge for `owner`, available at cold start
    pub fn message_requests_count(&self, owner: &Address) -> Result<Option<usize>> {
        Ok(self
            .store
            .get_number(&StorageKey::message_requests_count(owner))?
            .map(|n| n.max(0) as usize))
    }

    /// Participants persisted for `topic` by an earlier merge
    pub fn cached_participants(&self, topic: &Topic) -> Result<Option<Vec<Address>>> {
        let Some(joined) = self.store.get_string(&StorageKey::topic_addresses(topic))? else {
            return Ok(None);
        };
        joined
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                Address::parse(s).map_err(|e| {
                    Error::StorageCorrupted(format!("participants of {}: {}", topic, e))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Peers of a conversation, from the last merge or the participants cache
    pub fn peers_of(&self, owner: &Address, topic: &Topic) -> Result<Vec<Address>> {
        if let Some(merged) = self.latest.read().as_ref() {
            if let Some(summary) = merged.ordered.iter().find(|s| &s.id == topic) {
                return Ok(summary.peers(owner));
            }
        }
        match self.cached_participants(topic)? {
            Some(all) => Ok(all.into_iter().filter(|p| p != owner).collect()),
            None => Err(Error::ConversationNotFound(topic.to_string())),
        }
    }

    /// Search sections for a new-conversation screen
    ///
    /// Recents are the first `recents_limit` one-to-one conversations of the
    /// last merge; contacts are `allowed_peers`.
    pub fn search(
        &self,
        owner: &Address,
        query: &str,
        allowed_peers: &[Address],
        recents_limit: usize,
    ) -> Result<SearchSections> {
        let ordered = self.latest_ordered();

        let mut topic_by_peer: HashMap<Address, Topic> = HashMap::new();
        let mut recents = Vec::new();
        for summary in &ordered {
            let peers = summary.peers(owner);
            let [peer] = peers.as_slice() else {
                continue;
            };
            topic_by_peer
                .entry(peer.clone())
                .or_insert_with(|| summary.id.clone());
            if recents.len() < recents_limit {
                recents.push(SearchContact {
                    address: peer.clone(),
                    title: summary.title.clone(),
                    connected: summary.consent == ConsentState::Allowed,
                    topic: Some(summary.id.clone()),
                });
            }
        }

        let mut contacts = Vec::with_capacity(allowed_peers.len());
        for peer in allowed_peers {
            contacts.push(SearchContact {
                address: peer.clone(),
                title: self.contacts.get_contact_info(peer)?.title(),
                connected: true,
                topic: topic_by_peer.get(peer).cloned(),
            });
        }

        Ok(build_sections(query, recents, contacts))
    }
}

/// Later entries for an id replace earlier ones, keeping the earlier slot
fn dedup(remote: Vec<RemoteConversation>) -> Vec<RemoteConversation> {
    let mut slots: HashMap<Topic, usize> = HashMap::new();
    let mut out: Vec<RemoteConversation> = Vec::with_capacity(remote.len());
    for convo in remote {
        match slots.get(&convo.id) {
            Some(&slot) => out[slot] = convo,
            None => {
                slots.insert(convo.id.clone(), out.len());
                out.push(convo);
            }
        }
    }
    out
}

fn join_addresses(participants: &BTreeSet<Address>) -> String {
    participants
        .iter()
        .map(Address::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{addr, convo, settle, MockClient};
    use std::sync::atomic::Ordering;

    struct Fixture {
        client: Arc<MockClient>,
        consent: Arc<ConsentCache>,
        index: ConversationIndex,
        store: Arc<dyn KeyValueStore>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let client = MockClient::new();
        let consent = Arc::new(ConsentCache::new(store.clone(), client.clone()));
        let contacts = Arc::new(ContactInfoCache::new(store.clone(), client.clone()));
        let index = ConversationIndex::new(store.clone(), client.clone(), consent.clone(), contacts);
        Fixture {
            client,
            consent,
            index,
            store,
        }
    }

    fn ids(list: &[ConversationSummary]) -> Vec<&str> {
        list.iter().map(|s| s.id.as_str()).collect()
    }

    fn owner() -> Address {
        addr("0xA1")
    }

    fn allow(f: &Fixture, peer: &str) {
        f.consent
            .set_consent(&owner(), &ConsentSubject::Peer(addr(peer)), true)
            .unwrap();
    }

    #[test]
    fn test_empty_remote_list() {
        let f = fixture();
        let list = f.index.merge(&owner(), vec![]).unwrap();
        assert!(list.is_empty());
        assert_eq!(f.index.message_requests_count(&owner()).unwrap(), Some(0));
    }

    #[test]
    fn test_orders_newest_first() {
        let f = fixture();
        allow(&f, "0xB2");
        allow(&f, "0xC3");

        let list = f
            .index
            .merge(
                &owner(),
                vec![convo("A", &["0xA1", "0xB2"], 100), convo("B", &["0xA1", "0xC3"], 200)],
            )
            .unwrap();

        assert_eq!(ids(&list.allowed), vec!["B", "A"]);
    }

    #[test]
    fn test_ties_keep_remote_order() {
        let f = fixture();
        allow(&f, "0xB2");

        let list = f
            .index
            .merge(
                &owner(),
                vec![
                    convo("first", &["0xB2"], 100),
                    convo("second", &["0xB2"], 100),
                    convo("third", &["0xB2"], 100),
                ],
            )
            .unwrap();

        assert_eq!(ids(&list.allowed), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_ids_collapse_to_later_entry() {
        let f = fixture();
        allow(&f, "0xB2");

        let list = f
            .index
            .merge(
                &owner(),
                vec![
                    convo("X", &["0xB2"], 100),
                    convo("Y", &["0xB2"], 150),
                    convo("X", &["0xB2"], 300),
                ],
            )
            .unwrap();

        assert_eq!(ids(&list.allowed), vec!["X", "Y"]);
        assert_eq!(list.allowed[0].last_message_time, 300);
    }

    #[test]
    fn test_partitions_by_consent() {
        let f = fixture();
        allow(&f, "0xB2");
        f.consent
            .set_consent(&owner(), &ConsentSubject::Peer(addr("0xD4")), false)
            .unwrap();

        let list = f
            .index
            .merge(
                &owner(),
                vec![
                    convo("allowed", &["0xA1", "0xB2"], 300),
                    convo("request", &["0xA1", "0xC3"], 200),
                    convo("blocked", &["0xA1", "0xD4"], 100),
                ],
            )
            .unwrap();

        assert_eq!(ids(&list.allowed), vec!["allowed"]);
        assert_eq!(ids(&list.requests), vec!["request"]);
        assert_eq!(ids(&list.denied), vec!["blocked"]);
        assert_eq!(f.index.message_requests_count(&owner()).unwrap(), Some(1));
    }

    #[test]
    fn test_group_uses_topic_consent() {
        let f = fixture();
        allow(&f, "0xB2");

        let list = f
            .index
            .merge(&owner(), vec![convo("g", &["0xA1", "0xB2", "0xC3"], 100)])
            .unwrap();
        // Allowing one member does not allow the group
        assert_eq!(ids(&list.requests), vec!["g"]);

        f.consent
            .set_consent(&owner(), &ConsentSubject::Conversation(Topic::new("g")), true)
            .unwrap();
        let list = f.index.repartition().unwrap().unwrap();
        assert_eq!(ids(&list.allowed), vec!["g"]);
    }

    #[test]
    fn test_unresolved_peer_renders_formatted_address() {
        let f = fixture();
        let peer = "0x1234567890abcdef1234567890abcdef12345678";

        let list = f.index.merge(&owner(), vec![convo("t", &[peer], 100)]).unwrap();

        assert_eq!(list.requests[0].title, "0x1234...5678");
    }

    #[tokio::test]
    async fn test_group_title_joins_peer_names() {
        let f = fixture();
        f.client.set_display("0xB2", Some("bob.eth"), None);
        f.client.set_display("0xC3", Some("carol.eth"), None);
        f.client
            .set_conversations(vec![convo("g", &["0xA1", "0xB2", "0xC3"], 100)]);

        f.index.refresh(&owner()).await.unwrap();
        settle().await;
        let list = f.index.refresh(&owner()).await.unwrap();

        assert_eq!(list.requests[0].title, "bob.eth, carol.eth");
        assert!(list.requests[0].is_group(&owner()));
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates_and_keeps_last_merge() {
        let f = fixture();
        f.client.set_conversations(vec![convo("t", &["0xB2"], 100)]);
        f.index.refresh(&owner()).await.unwrap();

        f.client.fail_list.store(true, Ordering::SeqCst);
        let result = f.index.refresh(&owner()).await;

        assert!(matches!(result, Err(Error::RemoteListFailed(_))));
        assert_eq!(f.index.latest().unwrap().len(), 1);
    }

    #[test]
    fn test_participants_cached_per_topic() {
        let f = fixture();
        f.index
            .merge(&owner(), vec![convo("g", &["0xC3", "0xA1", "0xB2"], 100)])
            .unwrap();

        assert_eq!(
            f.store.get_string(&StorageKey::topic_addresses(&Topic::new("g"))).unwrap().as_deref(),
            Some("0xa1,0xb2,0xc3")
        );
        assert_eq!(
            f.index.cached_participants(&Topic::new("g")).unwrap(),
            Some(vec![addr("0xA1"), addr("0xB2"), addr("0xC3")])
        );
        assert_eq!(f.index.cached_participants(&Topic::new("none")).unwrap(), None);
    }

    #[test]
    fn test_peers_of_unknown_topic() {
        let f = fixture();
        assert!(matches!(
            f.index.peers_of(&owner(), &Topic::new("missing")),
            Err(Error::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_bump_moves_conversation_to_top() {
        let f = fixture();
        allow(&f, "0xB2");
        f.index
            .merge(
                &owner(),
                vec![
                    convo("new", &["0xB2"], 300),
                    convo("mid", &["0xB2"], 200),
                    convo("old", &["0xB2"], 100),
                ],
            )
            .unwrap();

        assert!(f.index.bump(&Topic::new("old"), 300, "just sent"));

        let list = f.index.latest().unwrap();
        assert_eq!(ids(&list.allowed), vec!["old", "new", "mid"]);
        assert_eq!(list.allowed[0].last_message_preview, "just sent");
        assert!(!f.index.bump(&Topic::new("missing"), 400, "x"));
    }

    #[test]
    fn test_requests_count_survives_cold_start() {
        let f = fixture();
        f.index
            .merge(&owner(), vec![convo("a", &["0xB2"], 1), convo("b", &["0xC3"], 2)])
            .unwrap();

        let cold = ConversationIndex::new(
            f.store.clone(),
            f.client.clone(),
            f.consent.clone(),
            Arc::new(ContactInfoCache::new(f.store.clone(), f.client.clone())),
        );
        assert!(cold.latest().is_none());
        assert_eq!(cold.message_requests_count(&owner()).unwrap(), Some(2));
    }

    #[test]
    fn test_search_sections() {
        let f = fixture();
        allow(&f, "0xB2");
        f.index
            .merge(
                &owner(),
                vec![
                    convo("t-b2", &["0xA1", "0xB2"], 300),
                    convo("group", &["0xA1", "0xB2", "0xC3"], 250),
                    convo("t-c3", &["0xA1", "0xC3"], 200),
                ],
            )
            .unwrap();

        let sections = f
            .index
            .search(&owner(), "0x", &[addr("0xB2"), addr("0xD4")], 3)
            .unwrap();

        assert_eq!(sections.typed.as_deref(), Some("0x"));
        let recents: Vec<&str> = sections.recents.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(recents, vec!["0xb2", "0xc3"]);
        assert!(sections.recents[0].connected);
        assert!(!sections.recents[1].connected);
        // 0xb2 is already a recent
        let contacts: Vec<&str> = sections.contacts.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(contacts, vec!["0xd4"]);
        assert_eq!(sections.contacts[0].topic, None);
    }
}
