//! # Contacts Module
//!
//! Display-name and avatar memoization per address.
//!
//! ## Lookup Order
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CONTACT INFO LOOKUP                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  get_contact_info(address)                                             │
//! │     │                                                                   │
//! │     ├─► memory hit                    ─► return                        │
//! │     ├─► CONTACT_INFO_<address>        ─► return                        │
//! │     ├─► ENS_NAME_ / ENS_AVATAR_       ─► return, resolve in background│
//! │     └─► nothing known                 ─► return formatted address,    │
//! │                                          resolve in background         │
//! │                                                                         │
//! │  Background resolution                                                 │
//! │     in_flight[address] exists ?  join it                               │
//! │                             else ?  client.resolve_display_info()      │
//! │     success ─► CONTACT_INFO written whole, legacy ENS keys dropped    │
//! │     failure ─► logged, previously known data left in place             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no expiry. A record stays until [`ContactInfoCache::invalidate`].

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::address::Address;
use crate::client::MessagingClient;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, StorageKey};
use crate::sync::FocusScope;

/// Display metadata for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Whose info this is
    pub address: Address,
    /// Resolved display name
    pub display_name: Option<String>,
    /// Resolved avatar URL
    pub avatar_url: Option<String>,
    /// Unix seconds of the resolution, `None` if never resolved by this cache
    pub fetched_at: Option<i64>,
}

impl ContactInfo {
    /// Placeholder used before anything is known
    pub fn fallback(address: &Address) -> Self {
        Self {
            address: address.clone(),
            display_name: None,
            avatar_url: None,
            fetched_at: None,
        }
    }

    /// Name to render: display name, or the shortened address
    pub fn title(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.address.formatted(),
        }
    }

    /// Whether this came from a completed resolution
    pub fn is_resolved(&self) -> bool {
        self.fetched_at.is_some()
    }
}

type Lookup = Shared<BoxFuture<'static, Result<ContactInfo>>>;

/// Read-through cache in front of `resolve_display_info`
pub struct ContactInfoCache {
    /// Durable store
    store: Arc<dyn KeyValueStore>,
    /// Messaging client used for resolution
    client: Arc<dyn MessagingClient>,
    /// Records read or resolved this session
    memory: Arc<RwLock<HashMap<Address, ContactInfo>>>,
    /// At most one outstanding lookup per address
    in_flight: Arc<Mutex<HashMap<Address, (u64, Lookup)>>>,
    /// Lookup id source
    next_lookup: AtomicU64,
}

impl ContactInfoCache {
    /// Create a new contact cache
    pub fn new(store: Arc<dyn KeyValueStore>, client: Arc<dyn MessagingClient>) -> Self {
        Self {
            store,
            client,
            memory: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_lookup: AtomicU64::new(1),
        }
    }

    /// Best known value without starting any lookup
    pub fn cached(&self, address: &Address) -> Result<Option<ContactInfo>> {
        if let Some(info) = self.memory.read().get(address) {
            tracing::debug!("Contact info memory hit for {}", address);
            return Ok(Some(info.clone()));
        }

        if let Some(json) = self.store.get_string(&StorageKey::contact_info(address))? {
            let info: ContactInfo = serde_json::from_str(&json).map_err(|e| {
                Error::StorageCorrupted(format!("contact info for {}: {}", address, e))
            })?;
            self.memory.write().insert(address.clone(), info.clone());
            return Ok(Some(info));
        }

        let name = self.store.get_string(&StorageKey::ens_name(address))?;
        let avatar = self.store.get_string(&StorageKey::ens_avatar(address))?;
        if name.is_none() && avatar.is_none() {
            return Ok(None);
        }

        // Legacy records are never memoized
        Ok(Some(ContactInfo {
            address: address.clone(),
            display_name: name,
            avatar_url: avatar,
            fetched_at: None,
        }))
    }

    /// Best known value now, resolving in the background when needed
    ///
    /// Never waits on the network. A full miss returns
    /// [`ContactInfo::fallback`].
    pub fn get_contact_info(&self, address: &Address) -> Result<ContactInfo> {
        self.get_contact_info_inner(address, None)
    }

    /// Like [`get_contact_info`](Self::get_contact_info), with the background
    /// resolution aborted when `scope` is cancelled
    pub fn get_contact_info_scoped(
        &self,
        address: &Address,
        scope: &FocusScope,
    ) -> Result<ContactInfo> {
        self.get_contact_info_inner(address, Some(scope))
    }

    fn get_contact_info_inner(
        &self,
        address: &Address,
        scope: Option<&FocusScope>,
    ) -> Result<ContactInfo> {
        let known = self.cached(address)?;
        if let Some(info) = &known {
            if info.is_resolved() {
                return Ok(info.clone());
            }
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let lookup = self.lookup(address);
            let task = handle.spawn(lookup);
            if let Some(scope) = scope {
                scope.track(task.abort_handle());
            }
        }

        Ok(known.unwrap_or_else(|| ContactInfo::fallback(address)))
    }

    /// Resolve now and wait for the result
    ///
    /// Joins a lookup already in flight for the same address.
    pub async fn refresh(&self, address: &Address) -> Result<ContactInfo> {
        self.lookup(address).await
    }

    /// Shared lookup for `address`, started if none is in flight
    fn lookup(&self, address: &Address) -> Lookup {
        let mut in_flight = self.in_flight.lock();
        if let Some((_, lookup)) = in_flight.get(address) {
            tracing::debug!("Joining in-flight contact lookup for {}", address);
            return lookup.clone();
        }

        let id = self.next_lookup.fetch_add(1, Ordering::SeqCst);
        let address = address.clone();
        let client = self.client.clone();
        let store = self.store.clone();
        let memory = self.memory.clone();
        let registry = self.in_flight.clone();
        let key = address.clone();

        let lookup = async move {
            let result = resolve_and_store(&client, &store, &memory, &registry, id, &address).await;
            let mut registry = registry.lock();
            if matches!(registry.get(&address), Some((current, _)) if *current == id) {
                registry.remove(&address);
            }
            result
        }
        .boxed()
        .shared();

        in_flight.insert(key, (id, lookup.clone()));
        lookup
    }

    /// Drop everything known about `address`
    ///
    /// A lookup in flight at this point still answers its waiters but its
    /// result is not kept.
    pub fn invalidate(&self, address: &Address) -> Result<()> {
        self.in_flight.lock().remove(address);
        self.memory.write().remove(address);
        self.store.delete(&StorageKey::contact_info(address))?;
        self.store.delete(&StorageKey::ens_name(address))?;
        self.store.delete(&StorageKey::ens_avatar(address))?;

        tracing::debug!("Contact info invalidated for {}", address);
        Ok(())
    }

    /// Drop the in-memory layer; the store is untouched
    pub fn clear_memory(&self) {
        self.memory.write().clear();
    }

    /// Lookups currently outstanding
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

async fn resolve_and_store(
    client: &Arc<dyn MessagingClient>,
    store: &Arc<dyn KeyValueStore>,
    memory: &RwLock<HashMap<Address, ContactInfo>>,
    registry: &Mutex<HashMap<Address, (u64, Lookup)>>,
    id: u64,
    address: &Address,
) -> Result<ContactInfo> {
    let display = match client.resolve_display_info(address).await {
        Ok(display) => display,
        Err(e) => {
            tracing::warn!("Contact resolution for {} failed: {}", address, e);
            return Err(e);
        }
    };

    let info = ContactInfo {
        address: address.clone(),
        display_name: display.display_name,
        avatar_url: display.avatar_url,
        fetched_at: Some(crate::time::now_timestamp()),
    };

    let still_wanted = matches!(registry.lock().get(address), Some((current, _)) if *current == id);
    if !still_wanted {
        tracing::debug!("Discarding contact info for {} after invalidation", address);
        return Ok(info);
    }

    let json = serde_json::to_string(&info)?;
    store.set(&StorageKey::contact_info(address), json.into())?;
    store.delete(&StorageKey::ens_name(address))?;
    store.delete(&StorageKey::ens_avatar(address))?;
    memory.write().insert(address.clone(), info.clone());

    tracing::debug!("Contact info resolved for {}", address);
    Ok(info)
}

// ============================================================================
// TESTS
// ============================================================================
