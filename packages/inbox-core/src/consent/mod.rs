//! # Consent Module
//!
//! Per-(owner, subject) trust state with optimistic local writes and
//! reconciliation against the messaging client's consent list.
//!
//! ## Consent State
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CONSENT STATE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  CONSENT_<owner>_<peer|topic>                                          │
//! │                                                                         │
//! │     absent  ──►  Unknown     (surfaced as a message request)           │
//! │     true    ──►  Allowed     (main conversation list)                  │
//! │     false   ──►  Denied      (hidden from the default view)            │
//! │                                                                         │
//! │  Only an explicit allow/block or a remote allowed/denied signal       │
//! │  creates or changes a record. Nothing writes Unknown back.             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write and Reconcile Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     OPTIMISTIC WRITE + RECONCILE                        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  block(owner, subject, peers)                                          │
//! │     │                                                                   │
//! │     ├─► store.set(CONSENT_..., false)      visible to the next read    │
//! │     │   overrides[key] = generation g1                                 │
//! │     │                                                                   │
//! │     └─► client.set_consent(peers, false)   runs to completion          │
//! │             ├── Ok   ─► divergence cleared                              │
//! │             └── Err  ─► divergence recorded, local state kept           │
//! │                                                                         │
//! │  refresh_from_remote(owner)                                            │
//! │     ticket = generation g2                                             │
//! │     list   = client.consent_list()                                     │
//! │     for each remote entry:                                             │
//! │        overrides[key] > g2 ?  keep local (written while in flight)     │
//! │        otherwise           ?  remote value wins, override dropped      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::address::{Address, ConsentSubject, Topic};
use crate::client::{MessagingClient, RemoteConsent, RemotePermission};
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, StorageKey};

/// Trust classification of a peer or conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentState {
    /// Messages are shown in the main list
    Allowed,
    /// Messages are hidden from the default view
    Denied,
    /// No decision yet; shown as a request
    Unknown,
}

impl ConsentState {
    /// Map a stored flag to a state
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => ConsentState::Allowed,
            Some(false) => ConsentState::Denied,
            None => ConsentState::Unknown,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentState::Allowed => "allowed",
            ConsentState::Denied => "denied",
            ConsentState::Unknown => "unknown",
        }
    }
}

impl From<RemotePermission> for ConsentState {
    fn from(permission: RemotePermission) -> Self {
        match permission {
            RemotePermission::Allowed => ConsentState::Allowed,
            RemotePermission::Denied => ConsentState::Denied,
        }
    }
}

/// One consent record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRecord {
    /// Account the record belongs to
    pub owner: Address,
    /// Peer or conversation
    pub subject: ConsentSubject,
    /// Current state
    pub state: ConsentState,
}

/// Result of an allow/block action
///
/// The local state is committed before the remote call starts; `remote`
/// reports what happened to the push so callers can surface divergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentOutcome {
    /// State now held locally
    pub state: ConsentState,
    /// Result of pushing the change to the messaging client
    pub remote: Result<()>,
}

impl ConsentOutcome {
    /// Local and remote may disagree until the next reconciliation
    pub fn is_diverged(&self) -> bool {
        self.remote.is_err()
    }
}

/// A local consent write the messaging client has not acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentDivergence {
    /// Account the record belongs to
    pub owner: Address,
    /// Peer or conversation
    pub subject: ConsentSubject,
    /// State the user asked for
    pub intended: ConsentState,
    /// Generation of the local write the push carried
    pub generation: u64,
    /// Why the push failed
    pub error: Error,
}

/// A consent write committed locally, with its push possibly still running
///
/// Every local effect has landed by the time this exists. Awaiting
/// [`PendingConsent::outcome`] only waits for the messaging client.
pub struct PendingConsent {
    state: ConsentState,
    push: Option<JoinHandle<Result<()>>>,
}

impl PendingConsent {
    /// State now held locally
    pub fn state(&self) -> ConsentState {
        self.state
    }

    /// Wait for the push and report it
    pub async fn outcome(self) -> ConsentOutcome {
        let remote = match self.push {
            Some(push) => push
                .await
                .unwrap_or_else(|e| Err(Error::Internal(format!("consent push task failed: {}", e)))),
            None => Ok(()),
        };
        ConsentOutcome {
            state: self.state,
            remote,
        }
    }
}

/// Marks the start of a remote consent fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentTicket {
    owner: Address,
    generation: u64,
}

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records overwritten with the remote value
    pub applied: usize,
    /// Records kept because a local write landed after the fetch started
    pub kept_local: usize,
    /// Peers whose effective state is Allowed after the pass
    pub allowed_peers: Vec<Address>,
}

/// Service for reading and writing consent
pub struct ConsentCache {
    /// Durable store
    store: Arc<dyn KeyValueStore>,
    /// Messaging client for pushes and consent lists
    client: Arc<dyn MessagingClient>,
    /// Generation of the newest local write per key
    overrides: Arc<RwLock<HashMap<StorageKey, u64>>>,
    /// Writes whose remote push failed
    divergences: Arc<RwLock<HashMap<StorageKey, ConsentDivergence>>>,
    /// Generation counter shared by local writes and fetch tickets
    generation: Mutex<u64>,
    /// Generation of the newest applied fetch, per owner
    last_applied: RwLock<HashMap<Address, u64>>,
}

impl ConsentCache {
    /// Create a new consent cache
    pub fn new(store: Arc<dyn KeyValueStore>, client: Arc<dyn MessagingClient>) -> Self {
        Self {
            store,
            client,
            overrides: Arc::new(RwLock::new(HashMap::new())),
            divergences: Arc::new(RwLock::new(HashMap::new())),
            generation: Mutex::new(0),
            last_applied: RwLock::new(HashMap::new()),
        }
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    /// Current consent state; absent records are `Unknown`
    pub fn get_consent(&self, owner: &Address, subject: &ConsentSubject) -> Result<ConsentState> {
        let key = StorageKey::consent(owner, subject);
        Ok(ConsentState::from_flag(self.store.get_bool(&key)?))
    }

    /// Full record for a subject
    pub fn record(&self, owner: &Address, subject: &ConsentSubject) -> Result<ConsentRecord> {
        Ok(ConsentRecord {
            owner: owner.clone(),
            subject: subject.clone(),
            state: self.get_consent(owner, subject)?,
        })
    }

    /// State a conversation screen opens with
    pub fn initial_consent_state(&self, owner: &Address, topic: &Topic) -> Result<ConsentState> {
        self.get_consent(owner, &ConsentSubject::Conversation(topic.clone()))
    }

    /// Write consent locally, without touching the network
    ///
    /// The write is visible to the next `get_consent` for the same pair.
    pub fn set_consent(&self, owner: &Address, subject: &ConsentSubject, allowed: bool) -> Result<()> {
        self.write_local(owner, subject, allowed).map(|_| ())
    }

    fn write_local(
        &self,
        owner: &Address,
        subject: &ConsentSubject,
        allowed: bool,
    ) -> Result<(StorageKey, u64)> {
        let key = StorageKey::consent(owner, subject);
        self.store.set(&key, allowed.into())?;

        let generation = self.next_generation();
        self.overrides.write().insert(key.clone(), generation);

        tracing::info!(
            "Consent for {} set to {} by {}",
            subject.key_id(),
            ConsentState::from_flag(Some(allowed)).as_str(),
            owner
        );
        Ok((key, generation))
    }

    /// Allow a subject locally, then push to the messaging client
    pub async fn allow(
        &self,
        owner: &Address,
        subject: &ConsentSubject,
        peers: &[Address],
    ) -> Result<ConsentOutcome> {
        self.update_consent(owner, subject, peers, true).await
    }

    /// Block a subject locally, then push to the messaging client
    pub async fn block(
        &self,
        owner: &Address,
        subject: &ConsentSubject,
        peers: &[Address],
    ) -> Result<ConsentOutcome> {
        self.update_consent(owner, subject, peers, false).await
    }

    /// Optimistic write followed by a remote push
    ///
    /// A store failure is returned as an error. A remote failure is not: it
    /// comes back inside the outcome and is recorded as a divergence. The
    /// push runs on its own task so dropping this future does not cancel it.
    pub async fn update_consent(
        &self,
        owner: &Address,
        subject: &ConsentSubject,
        peers: &[Address],
        allowed: bool,
    ) -> Result<ConsentOutcome> {
        let pending = self.commit(owner, subject, peers, allowed)?;
        Ok(pending.outcome().await)
    }

    /// Write locally and start the remote push without waiting for it
    ///
    /// With no peers there is nothing to push and the outcome is `Ok`.
    pub fn commit(
        &self,
        owner: &Address,
        subject: &ConsentSubject,
        peers: &[Address],
        allowed: bool,
    ) -> Result<PendingConsent> {
        let (key, generation) = self.write_local(owner, subject, allowed)?;
        let state = ConsentState::from_flag(Some(allowed));

        if peers.is_empty() {
            return Ok(PendingConsent { state, push: None });
        }

        let client = self.client.clone();
        let overrides = self.overrides.clone();
        let divergences = self.divergences.clone();
        let peers = peers.to_vec();
        let (owner, subject) = (owner.clone(), subject.clone());

        let push = tokio::spawn(async move {
            let result = client.set_consent(&peers, allowed).await;
            match &result {
                Ok(()) => {
                    let mut divergences = divergences.write();
                    if divergences
                        .get(&key)
                        .is_some_and(|d| d.generation <= generation)
                    {
                        divergences.remove(&key);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Consent push for {} failed, keeping local state: {}",
                        subject.key_id(),
                        e
                    );
                    // A newer write owns the key; its own push reports for it
                    let current = overrides.read().get(&key) == Some(&generation);
                    if current {
                        divergences.write().insert(
                            key,
                            ConsentDivergence {
                                owner,
                                subject,
                                intended: state,
                                generation,
                                error: e.clone(),
                            },
                        );
                    }
                }
            }
            result
        });

        Ok(PendingConsent {
            state,
            push: Some(push),
        })
    }

    /// Write locally when the change cannot be pushed at all
    ///
    /// The write lands and `reason` is recorded as a divergence and returned
    /// as the remote result.
    pub fn commit_unpushed(
        &self,
        owner: &Address,
        subject: &ConsentSubject,
        allowed: bool,
        reason: Error,
    ) -> Result<ConsentOutcome> {
        let (key, generation) = self.write_local(owner, subject, allowed)?;
        let state = ConsentState::from_flag(Some(allowed));

        tracing::warn!(
            "Consent for {} kept local only: {}",
            subject.key_id(),
            reason
        );
        self.divergences.write().insert(
            key,
            ConsentDivergence {
                owner: owner.clone(),
                subject: subject.clone(),
                intended: state,
                generation,
                error: reason.clone(),
            },
        );

        Ok(ConsentOutcome {
            state,
            remote: Err(reason),
        })
    }

    /// Local writes the messaging client has not acknowledged
    pub fn divergences(&self) -> Vec<ConsentDivergence> {
        self.divergences.read().values().cloned().collect()
    }

    /// Start a remote fetch; local writes after this point win over it
    pub fn begin_fetch(&self, owner: &Address) -> ConsentTicket {
        ConsentTicket {
            owner: owner.clone(),
            generation: self.next_generation(),
        }
    }

    /// Apply a remote consent list fetched under `ticket`
    ///
    /// Rejects a ticket older than one already applied for the same owner.
    pub fn apply_remote(
        &self,
        ticket: &ConsentTicket,
        entries: &[RemoteConsent],
    ) -> Result<ReconcileReport> {
        {
            let mut last_applied = self.last_applied.write();
            let newest = last_applied.entry(ticket.owner.clone()).or_insert(0);
            if ticket.generation < *newest {
                return Err(Error::StaleConsentFetch);
            }
            *newest = ticket.generation;
        }

        let mut report = ReconcileReport::default();

        for entry in entries {
            let subject = ConsentSubject::Peer(entry.peer.clone());
            let key = StorageKey::consent(&ticket.owner, &subject);

            let local_generation = self.overrides.read().get(&key).copied();
            let effective = match local_generation {
                Some(g) if g > ticket.generation => {
                    report.kept_local += 1;
                    self.get_consent(&ticket.owner, &subject)?
                }
                _ => {
                    let remote_state = ConsentState::from(entry.permission);
                    if self.get_consent(&ticket.owner, &subject)? != remote_state {
                        self.store
                            .set(&key, (remote_state == ConsentState::Allowed).into())?;
                    }
                    self.overrides.write().remove(&key);
                    self.divergences.write().remove(&key);
                    report.applied += 1;
                    remote_state
                }
            };

            if effective == ConsentState::Allowed {
                report.allowed_peers.push(entry.peer.clone());
            }
        }

        tracing::debug!(
            "Consent reconciled for {}: {} applied, {} kept local",
            ticket.owner,
            report.applied,
            report.kept_local
        );
        Ok(report)
    }

    /// Fetch the remote consent list and reconcile against it
    pub async fn refresh_from_remote(&self, owner: &Address) -> Result<ReconcileReport> {
        let ticket = self.begin_fetch(owner);
        let entries = self.client.consent_list().await?;
        self.apply_remote(&ticket, &entries)
    }

    /// Drop in-memory bookkeeping; stored records are untouched
    pub fn reset(&self) {
        self.overrides.write().clear();
        self.divergences.write().clear();
        self.last_applied.write().clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
