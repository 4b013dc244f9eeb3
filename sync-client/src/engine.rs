//! Sync engine: list operations on top of a relay backend.
//!
//! The engine signs every change as a LIST event, publishes it, and keeps a
//! local [`ListCache`] that remote versions are merged into with
//! last-write-wins. The cache is persisted through the key-value store so
//! lists are still readable when no relay is reachable.
//!
//! Long-lived views are [`Feed`]s: a channel fed by a background task that
//! reads one backend subscription. Closing a feed (or dropping it, or
//! shutting the engine down) closes the subscription and stops the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration as ChronoDuration, Utc};
use listsync_core::{merge, ListCache};
use listsync_types::event::TYPE_GROCERY_LIST;
use listsync_types::{Event, Filter, GroceryList, Item, Kind, ListId, ListInvite, PublicKey};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::backend::{EndpointStatus, PoolError, RelayBackend};
use crate::codec::{encode_list, open_list};
use crate::crypto::unix_now;
use crate::identity::Keys;
use crate::store::{KeyValueStore, StoreError};
use crate::subscription::{Subscription, SubscriptionHandle};

/// Store key for the list cache snapshot.
pub const CACHE_KEY: &str = "lists.cache";

/// Name of the list created when seeding an empty account.
pub const DEFAULT_LIST_NAME: &str = "Demo Grocery List";

/// Items of the seeded list.
pub fn default_items() -> Vec<Item> {
    vec![
        Item::new("Milk", 1.0, "gallon", "dairy"),
        Item::new("Bread", 1.0, "loaf", "bakery"),
        Item::new("Eggs", 12.0, "", "dairy"),
        Item::new("Apples", 6.0, "", "produce"),
    ]
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn check_items(items: &[Item]) -> Result<(), EngineError> {
    match items.iter().find(|item| !item.qty.is_finite()) {
        Some(item) => Err(EngineError::InvalidQuantity(item.name.clone())),
        None => Ok(()),
    }
}

/// Decode a persisted cache snapshot entry by entry. Entries that no longer
/// decode are skipped so one bad list cannot take the others with it.
fn restore_cache(json: &str) -> ListCache {
    let entries = match serde_json::from_str::<Vec<serde_json::Value>>(json) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable list cache");
            return ListCache::new();
        }
    };
    let mut lists = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<GroceryList>(entry) {
            Ok(list) => lists.push(list),
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable cached list"),
        }
    }
    ListCache::restore(lists)
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation needs a live relay connection.
    #[error("offline: no relay connected")]
    Offline,

    /// Neither the cache nor any relay knows the list.
    #[error("list not found: {0}")]
    NotFound(ListId),

    /// No relay accepted the event. The cache is unchanged.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// A recipient key could not be parsed.
    #[error("invalid recipient key: {0}")]
    InvalidRecipientKey(String),

    /// An item quantity is NaN or infinite and cannot be encoded.
    #[error("invalid quantity for {0}: must be a finite number")]
    InvalidQuantity(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A payload could not be serialized.
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<PoolError> for EngineError {
    fn from(e: PoolError) -> Self {
        EngineError::PublishFailed(e.to_string())
    }
}

/// Engine options.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Create [`DEFAULT_LIST_NAME`] when an online fetch finds no lists.
    pub seed_default_list: bool,
}

impl EngineConfig {
    /// Enable or disable seeding of the demo list.
    pub fn with_seed_default_list(mut self, seed: bool) -> Self {
        self.seed_default_list = seed;
        self
    }
}

// ===========================================
// Feed
// ===========================================

/// A stream of updates produced by a background subscription.
///
/// `next()` returns `None` once the feed is closed or its source ends.
/// Dropping the feed closes it.
pub struct Feed<T> {
    rx: mpsc::UnboundedReceiver<T>,
    handle: Option<SubscriptionHandle>,
    task: Option<AbortHandle>,
}

/// Versions of one list.
pub type ListFeed = Feed<GroceryList>;

/// The full set of owned lists after every accepted change.
pub type OwnedListsFeed = Feed<Vec<GroceryList>>;

/// Incoming invites.
pub type InviteFeed = Feed<ListInvite>;

impl<T> Feed<T> {
    /// A feed that has already ended.
    fn idle() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            handle: None,
            task: None,
        }
    }

    /// Wait for the next update.
    pub async fn next(&mut self) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        let value = self.rx.recv().await?;
        if self.is_closed() {
            return None;
        }
        Some(value)
    }

    /// Take an already-produced update without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Whether the feed has been closed.
    pub fn is_closed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_closed())
    }

    /// Close the feed and its subscription. Idempotent.
    pub fn close(&self) {
        if let Some(handle) = &self.handle {
            handle.close();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("subscription", &self.handle.as_ref().map(|h| h.id().clone()))
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Result of [`SyncEngine::fetch_owned_lists`].
#[derive(Debug)]
pub struct OwnedLists {
    /// Owned lists known right now, newest first.
    pub initial: Vec<GroceryList>,
    /// Later changes. Ends immediately when fetched offline.
    pub updates: OwnedListsFeed,
}

// ===========================================
// Shared state
// ===========================================

pub(crate) struct Shared {
    keys: Keys,
    cache: Mutex<ListCache>,
    dirty: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn KeyValueStore>,
}

impl Shared {
    pub(crate) fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Verify, decode and merge one LIST event. Returns the merged list if
    /// the cache changed.
    pub(crate) fn absorb(&self, event: &Event) -> Option<GroceryList> {
        let list = match open_list(event) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(event = %event.id, error = %e, "Dropping list event");
                return None;
            }
        };
        let id = list.id.clone();
        let mut cache = lock(&self.cache);
        if merge(&mut cache, list).changed() {
            self.dirty.store(true, Ordering::SeqCst);
            tracing::debug!(list = %id, "Merged remote version");
            cache.get(&id).cloned()
        } else {
            None
        }
    }

    fn remember(&self, list: GroceryList) {
        if merge(&mut lock(&self.cache), list).changed() {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    fn cached(&self, id: &ListId) -> Option<GroceryList> {
        lock(&self.cache).get(id).cloned()
    }

    fn owned(&self) -> Vec<GroceryList> {
        lock(&self.cache).all_owned_by(&self.public_key())
    }

    /// Write the cache snapshot if anything changed since the last write.
    pub(crate) async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        let snapshot = lock(&self.cache).snapshot();
        let result = match serde_json::to_string(&snapshot) {
            Ok(json) => self.store.put(CACHE_KEY, &json).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(error) = result {
            self.dirty.store(true, Ordering::SeqCst);
            tracing::warn!(%error, "Failed to persist list cache");
        }
    }
}

// ===========================================
// SyncEngine
// ===========================================

/// Grocery list sync over a relay backend.
pub struct SyncEngine {
    backend: Arc<dyn RelayBackend>,
    shared: Arc<Shared>,
    config: EngineConfig,
    feeds: Mutex<Vec<(SubscriptionHandle, AbortHandle)>>,
}

impl SyncEngine {
    /// Open an engine for `keys`, restoring the cache persisted in `store`.
    ///
    /// Unreadable cache entries are logged and skipped.
    pub async fn open(
        backend: Arc<dyn RelayBackend>,
        keys: Keys,
        store: Arc<dyn KeyValueStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let cache = match store.get(CACHE_KEY).await? {
            Some(json) => restore_cache(&json),
            None => ListCache::new(),
        };
        tracing::debug!(
            pubkey = %keys.public_key().short(),
            cached = cache.len(),
            "Engine opened"
        );

        Ok(Self {
            backend,
            shared: Arc::new(Shared {
                keys,
                cache: Mutex::new(cache),
                dirty: AtomicBool::new(false),
                persist_lock: tokio::sync::Mutex::new(()),
                store,
            }),
            config,
            feeds: Mutex::new(Vec::new()),
        })
    }

    /// Connect the backend to `endpoints`. Unreachable endpoints leave the
    /// engine in offline mode rather than failing.
    pub async fn connect(&self, endpoints: &[String]) -> Vec<EndpointStatus> {
        self.backend.connect(endpoints).await
    }

    /// Whether any relay is usable.
    pub fn is_online(&self) -> bool {
        self.backend.is_connected()
    }

    /// Per-endpoint connection state.
    pub fn status(&self) -> Vec<EndpointStatus> {
        self.backend.status()
    }

    /// This engine's public key.
    pub fn public_key(&self) -> PublicKey {
        self.shared.public_key()
    }

    /// Every cached list, newest first, including lists shared with us.
    pub fn cached_lists(&self) -> Vec<GroceryList> {
        lock(&self.shared.cache).all()
    }

    /// One cached list.
    pub fn cached_list(&self, id: &ListId) -> Option<GroceryList> {
        self.shared.cached(id)
    }

    /// Create a list, publish it and cache it.
    pub async fn create_list(&self, name: &str, items: Vec<Item>) -> Result<ListId, EngineError> {
        check_items(&items)?;
        let list = GroceryList::new(
            ListId::generate(),
            name,
            items,
            self.public_key(),
            Utc::now(),
        );
        let id = list.id.clone();
        self.publish_list(list).await?;
        tracing::info!(list = %id, %name, "Created list");
        Ok(id)
    }

    /// Replace a list's name and items with a new, newer version.
    ///
    /// The prior version comes from the cache, or from a relay query when
    /// the list was never seen locally.
    pub async fn update_list(
        &self,
        list_id: &ListId,
        name: &str,
        items: Vec<Item>,
    ) -> Result<GroceryList, EngineError> {
        check_items(&items)?;
        let previous = self.get_list(list_id).await?;
        // A whole second past the previous version, so the event's
        // created_at (seconds) also moves forward within one slot
        let floor = previous.updated_at + ChronoDuration::seconds(1);
        let updated = GroceryList {
            name: name.to_string(),
            items,
            updated_at: Utc::now().max(floor),
            ..previous
        };
        self.publish_list(updated.clone()).await?;
        tracing::info!(list = %list_id, items = updated.items.len(), "Updated list");
        Ok(updated)
    }

    /// Remove every item named `item_name`, returning the remaining items.
    ///
    /// Removing an absent item still publishes an unchanged version.
    pub async fn remove_item(
        &self,
        list_id: &ListId,
        name: &str,
        item_name: &str,
    ) -> Result<Vec<Item>, EngineError> {
        let current = self.get_list(list_id).await?;
        let items = current.items_without(item_name);
        let updated = self.update_list(list_id, name, items).await?;
        Ok(updated.items)
    }

    /// Lists owned by this key, plus a feed of later changes.
    pub async fn fetch_owned_lists(&self) -> Result<OwnedLists, EngineError> {
        if !self.is_online() {
            tracing::debug!("Offline, serving owned lists from cache");
            return Ok(OwnedLists {
                initial: self.shared.owned(),
                updates: Feed::idle(),
            });
        }

        let filter = Filter::new()
            .kind(Kind::List)
            .author(self.public_key())
            .type_tag(TYPE_GROCERY_LIST);
        let since = unix_now();
        for event in self.backend.query(filter.clone()).await {
            self.shared.absorb(&event);
        }
        self.shared.persist().await;

        let mut initial = self.shared.owned();
        if initial.is_empty() && self.config.seed_default_list {
            match self.create_list(DEFAULT_LIST_NAME, default_items()).await {
                Ok(_) => initial = self.shared.owned(),
                Err(e) => tracing::warn!(error = %e, "Could not seed default list"),
            }
        }

        let updates = match self.backend.subscribe(filter.since(since)).await {
            Ok(subscription) => self.spawn_feed(subscription, Vec::new(), |shared, event| {
                shared.absorb(event).map(|_| shared.owned())
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Could not subscribe to owned lists");
                Feed::idle()
            }
        };
        Ok(OwnedLists { initial, updates })
    }

    /// Follow one list. The cached version (if any) is delivered first, then
    /// every newer version from any writer.
    pub async fn watch_list(&self, list_id: &ListId) -> Result<ListFeed, EngineError> {
        let filter = Filter::new().kind(Kind::List).list_id(list_id);
        let subscription = self.backend.subscribe(filter).await.map_err(offline)?;
        let initial: Vec<GroceryList> = self.shared.cached(list_id).into_iter().collect();
        let wanted = list_id.clone();
        Ok(self.spawn_feed(subscription, initial, move |shared, event| {
            shared.absorb(event).filter(|list| list.id == wanted)
        }))
    }

    /// Close every feed, stop their tasks and release the backend.
    pub async fn shutdown(&self) {
        let feeds: Vec<_> = lock(&self.feeds).drain(..).collect();
        for (handle, task) in feeds {
            handle.close();
            task.abort();
        }
        self.backend.shutdown().await;
        self.shared.persist().await;
        tracing::info!("Engine shut down");
    }

    // ===========================================
    // Internals shared with the invite protocol
    // ===========================================

    pub(crate) fn backend(&self) -> &Arc<dyn RelayBackend> {
        &self.backend
    }

    pub(crate) fn keys(&self) -> &Keys {
        &self.shared.keys
    }

    /// A list by id: the cached version, else whatever the relays hold.
    pub async fn get_list(&self, list_id: &ListId) -> Result<GroceryList, EngineError> {
        if let Some(list) = self.shared.cached(list_id) {
            return Ok(list);
        }
        let filter = Filter::new().kind(Kind::List).list_id(list_id);
        for event in self.backend.query(filter).await {
            self.shared.absorb(&event);
        }
        self.shared.persist().await;
        self.shared
            .cached(list_id)
            .ok_or_else(|| EngineError::NotFound(list_id.clone()))
    }

    async fn publish_list(&self, list: GroceryList) -> Result<(), EngineError> {
        let event = encode_list(self.keys(), &list)?;
        self.backend.publish(event).await?;
        self.shared.remember(list);
        self.shared.persist().await;
        Ok(())
    }

    /// Run `handler` on every event of `subscription` in a background task,
    /// forwarding what it returns. `initial` values are queued first.
    pub(crate) fn spawn_feed<T, F>(
        &self,
        mut subscription: Subscription,
        initial: Vec<T>,
        handler: F,
    ) -> Feed<T>
    where
        T: Send + 'static,
        F: Fn(&Shared, &Event) -> Option<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        for value in initial {
            let _ = tx.send(value);
        }

        let handle = subscription.handle();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(value) = handler(&shared, &event) else {
                    continue;
                };
                shared.persist().await;
                if tx.send(value).is_err() {
                    break;
                }
            }
            tracing::debug!(sub = %subscription.id(), "Feed ended");
        })
        .abort_handle();

        let mut feeds = lock(&self.feeds);
        feeds.retain(|(h, _)| !h.is_closed());
        feeds.push((handle.clone(), task.clone()));

        Feed {
            rx,
            handle: Some(handle),
            task: Some(task),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("pubkey", &self.public_key())
            .field("online", &self.is_online())
            .field("config", &self.config)
            .finish()
    }
}

pub(crate) fn offline(e: PoolError) -> EngineError {
    match e {
        PoolError::Offline | PoolError::ShutDown => EngineError::Offline,
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, PoolConfig, RelayPool};
    use crate::identity::IdentityStore;
    use crate::store::MemoryStore;
    use crate::transport::{MockNetwork, MockRelay};
    use std::time::Duration;

    const RELAY: &str = "wss://relay.test";

    fn pool(network: &MockNetwork) -> Arc<dyn RelayBackend> {
        let network = network.clone();
        let config = PoolConfig::default()
            .with_connect_timeout(Duration::from_millis(100))
            .with_publish_timeout(Duration::from_millis(100))
            .with_query_timeout(Duration::from_millis(200));
        Arc::new(RelayPool::new(move |_| network.transport(), config))
    }

    async fn engine_with(
        network: &MockNetwork,
        keys: Keys,
        store: Arc<dyn KeyValueStore>,
        config: EngineConfig,
    ) -> SyncEngine {
        let engine = SyncEngine::open(pool(network), keys, store, config)
            .await
            .unwrap();
        engine.connect(&[RELAY.to_string()]).await;
        engine
    }

    async fn online(network: &MockNetwork, keys: Keys) -> SyncEngine {
        engine_with(
            network,
            keys,
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
        )
        .await
    }

    fn network() -> (MockNetwork, MockRelay) {
        let network = MockNetwork::new();
        let relay = network.add_relay(RELAY);
        (network, relay)
    }

    async fn next<T>(feed: &mut Feed<T>) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(1), feed.next())
            .await
            .ok()
            .flatten()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn trip_items() -> Vec<Item> {
        vec![
            Item::new("Water", 6.0, "bottle", "drinks"),
            Item::new("Sunscreen", 1.0, "", "health"),
        ]
    }

    // ===========================================
    // Create / update / remove
    // ===========================================

    #[tokio::test]
    async fn created_list_round_trips_through_the_relay() {
        let (network, relay) = network();
        let keys = Keys::generate();
        let writer = online(&network, keys.clone()).await;

        let id = writer.create_list("Trip", trip_items()).await.unwrap();
        assert_eq!(relay.events().len(), 1);

        // Same key on a second device with an empty cache
        let reader = online(&network, keys).await;
        let owned = reader.fetch_owned_lists().await.unwrap();
        assert_eq!(owned.initial.len(), 1);
        let list = &owned.initial[0];
        assert_eq!(list.id, id);
        assert_eq!(list.name, "Trip");
        assert_eq!(list.items, trip_items());
        assert_eq!(list.owner, writer.public_key());
        assert_eq!(Some(list.clone()), writer.cached_list(&id));
    }

    #[tokio::test]
    async fn update_stamps_a_strictly_newer_version() {
        let (network, relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();
        let created = engine.cached_list(&id).unwrap();

        let first = engine.update_list(&id, "Trip", vec![]).await.unwrap();
        let second = engine.update_list(&id, "Road trip", vec![]).await.unwrap();

        assert!(first.updated_at > created.updated_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.created_at, created.created_at);
        assert_eq!(engine.cached_list(&id).unwrap().name, "Road trip");
        // One replaceable slot per list
        assert_eq!(relay.events().len(), 1);
    }

    #[tokio::test]
    async fn rapid_edits_publish_strictly_ordered_events() {
        let (network, relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();
        engine.update_list(&id, "Trip", vec![]).await.unwrap();
        let last = engine
            .update_list(&id, "Trip", vec![Item::new("Tent", 1.0, "", "")])
            .await
            .unwrap();

        let stamps: Vec<u64> = relay.published().iter().map(|e| e.created_at).collect();
        assert_eq!(stamps.len(), 3);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{:?}", stamps);

        // The relay keeps the final version in the list's slot
        let stored = relay.events();
        assert_eq!(stored.len(), 1);
        assert_eq!(open_list(&stored[0]).unwrap(), last);
    }

    #[tokio::test]
    async fn non_finite_quantities_are_rejected_before_publishing() {
        let (network, relay) = network();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let keys = Keys::generate();
        let engine = engine_with(&network, keys.clone(), store.clone(), EngineConfig::default()).await;
        let id = engine
            .create_list("Good", vec![Item::new("Milk", 1.0, "gallon", "dairy")])
            .await
            .unwrap();
        let published = relay.published().len();

        let result = engine
            .create_list("Bad", vec![Item::new("Eggs", f64::NAN, "", "")])
            .await;
        assert!(matches!(result, Err(EngineError::InvalidQuantity(ref name)) if name == "Eggs"));
        let result = engine
            .update_list(&id, "Good", vec![Item::new("Milk", f64::INFINITY, "", "")])
            .await;
        assert!(matches!(result, Err(EngineError::InvalidQuantity(_))));
        assert_eq!(relay.published().len(), published);
        engine.shutdown().await;

        let reopened = engine_with(&network, keys, store, EngineConfig::default()).await;
        let cached = reopened.cached_lists();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].items, vec![Item::new("Milk", 1.0, "gallon", "dairy")]);
    }

    #[tokio::test]
    async fn update_loads_unknown_list_from_relay() {
        let (network, _relay) = network();
        let keys = Keys::generate();
        let id = online(&network, keys.clone())
            .await
            .create_list("Trip", trip_items())
            .await
            .unwrap();

        let other_device = online(&network, keys).await;
        let updated = other_device
            .update_list(&id, "Trip", vec![Item::new("Hat", 1.0, "", "")])
            .await
            .unwrap();
        assert_eq!(updated.items.len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_list_is_not_found() {
        let (network, _relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let missing = ListId::new("list_missing");

        match engine.update_list(&missing, "x", vec![]).await {
            Err(EngineError::NotFound(id)) => assert_eq!(id, missing),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn remove_item_is_idempotent() {
        let (network, _relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();

        let once = engine.remove_item(&id, "Trip", "Water").await.unwrap();
        let twice = engine.remove_item(&id, "Trip", "Water").await.unwrap();
        let absent = engine.remove_item(&id, "Trip", "Kayak").await.unwrap();

        assert_eq!(once, vec![Item::new("Sunscreen", 1.0, "", "health")]);
        assert_eq!(twice, once);
        assert_eq!(absent, once);
    }

    #[tokio::test]
    async fn rejected_publish_leaves_cache_unchanged() {
        let (network, relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();
        let before = engine.cached_list(&id).unwrap();

        relay.reject_publishes("blocked: read-only");
        let result = engine.update_list(&id, "Changed", vec![]).await;
        assert!(matches!(result, Err(EngineError::PublishFailed(_))));
        assert_eq!(engine.cached_list(&id).unwrap(), before);

        let result = engine.create_list("Other", vec![]).await;
        assert!(matches!(result, Err(EngineError::PublishFailed(_))));
        assert_eq!(engine.cached_lists().len(), 1);
    }

    // ===========================================
    // Offline behaviour and persistence
    // ===========================================

    #[tokio::test]
    async fn offline_fetch_serves_the_persisted_cache() {
        let (network, _relay) = network();
        let keys = Keys::generate();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let id = engine_with(&network, keys.clone(), store.clone(), EngineConfig::default())
            .await
            .create_list("Trip", trip_items())
            .await
            .unwrap();

        // Reopen with nothing reachable
        let engine = SyncEngine::open(pool(&MockNetwork::new()), keys, store, EngineConfig::default())
            .await
            .unwrap();
        engine.connect(&[RELAY.to_string()]).await;
        assert!(!engine.is_online());

        let mut owned = engine.fetch_owned_lists().await.unwrap();
        assert_eq!(owned.initial.len(), 1);
        assert_eq!(owned.initial[0].id, id);
        assert!(owned.updates.next().await.is_none());

        let result = engine.create_list("Offline", vec![]).await;
        assert!(matches!(result, Err(EngineError::PublishFailed(_))));
        assert!(matches!(
            engine.watch_list(&id).await,
            Err(EngineError::Offline)
        ));
    }

    #[tokio::test]
    async fn corrupt_cache_is_discarded() {
        let store = MemoryStore::new();
        store.put(CACHE_KEY, "{broken").await.unwrap();
        let engine = SyncEngine::open(
            pool(&MockNetwork::new()),
            Keys::generate(),
            Arc::new(store),
            EngineConfig::default(),
        )
        .await
        .unwrap();
        assert!(engine.cached_lists().is_empty());
    }

    #[tokio::test]
    async fn unreadable_cache_entry_does_not_drop_the_others() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let keys = Keys::generate();
        let backend: Arc<dyn RelayBackend> =
            Arc::new(LocalBackend::open(store.clone()).await.unwrap());
        let engine = SyncEngine::open(backend, keys.clone(), store.clone(), EngineConfig::default())
            .await
            .unwrap();
        let id = engine.create_list("Good", trip_items()).await.unwrap();
        engine.shutdown().await;

        // A second entry whose quantity no longer decodes
        let json = store.get(CACHE_KEY).await.unwrap().unwrap();
        let mut entries: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        let mut bad = entries[0].clone();
        bad["id"] = serde_json::json!("list_bad");
        bad["items"][0]["qty"] = serde_json::Value::Null;
        entries.push(bad);
        store
            .put(CACHE_KEY, &serde_json::to_string(&entries).unwrap())
            .await
            .unwrap();

        let reopened = SyncEngine::open(
            pool(&MockNetwork::new()),
            keys,
            store,
            EngineConfig::default(),
        )
        .await
        .unwrap();
        let cached = reopened.cached_lists();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, id);
    }

    #[tokio::test]
    async fn identity_is_reused_across_sessions() {
        let (network, _relay) = network();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let first_keys = IdentityStore::new(store.clone()).get_or_create().await.unwrap();
        let first = engine_with(&network, first_keys, store.clone(), EngineConfig::default()).await;
        let id = first.create_list("Trip", trip_items()).await.unwrap();
        first.shutdown().await;

        let second_keys = IdentityStore::new(store.clone()).get_or_create().await.unwrap();
        let second = engine_with(&network, second_keys, store, EngineConfig::default()).await;
        assert_eq!(second.public_key(), first.public_key());
        let owned = second.fetch_owned_lists().await.unwrap();
        assert_eq!(owned.initial[0].id, id);
    }

    #[tokio::test]
    async fn local_backend_works_without_network() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let backend = Arc::new(LocalBackend::open(store.clone()).await.unwrap());
        let engine = SyncEngine::open(
            backend,
            Keys::generate(),
            store,
            EngineConfig::default().with_seed_default_list(true),
        )
        .await
        .unwrap();

        let owned = engine.fetch_owned_lists().await.unwrap();
        assert_eq!(owned.initial.len(), 1);
        assert_eq!(owned.initial[0].name, DEFAULT_LIST_NAME);
        assert_eq!(owned.initial[0].items, default_items());
    }

    // ===========================================
    // Feeds
    // ===========================================

    #[tokio::test]
    async fn seeding_happens_only_when_empty() {
        let (network, relay) = network();
        let config = EngineConfig::default().with_seed_default_list(true);
        let keys = Keys::generate();

        let engine = engine_with(&network, keys.clone(), Arc::new(MemoryStore::new()), config.clone()).await;
        let owned = engine.fetch_owned_lists().await.unwrap();
        assert_eq!(owned.initial.len(), 1);
        assert_eq!(owned.initial[0].name, DEFAULT_LIST_NAME);

        let again = engine_with(&network, keys, Arc::new(MemoryStore::new()), config).await;
        again.fetch_owned_lists().await.unwrap();
        assert_eq!(relay.events().len(), 1);
    }

    #[tokio::test]
    async fn owned_feed_yields_changes_from_other_devices() {
        let (network, _relay) = network();
        let keys = Keys::generate();
        let phone = online(&network, keys.clone()).await;
        let laptop = online(&network, keys).await;
        let id = phone.create_list("Trip", trip_items()).await.unwrap();

        let mut owned = laptop.fetch_owned_lists().await.unwrap();
        assert_eq!(owned.initial.len(), 1);

        phone.update_list(&id, "Trip", vec![]).await.unwrap();
        let lists = next(&mut owned.updates).await.unwrap();
        assert_eq!(lists.len(), 1);
        assert!(lists[0].items.is_empty());
        assert!(laptop.cached_list(&id).unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn duplicate_delivery_reaches_the_feed_once() {
        let (network, relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();

        let mut feed = engine.watch_list(&id).await.unwrap();
        // Cached snapshot first
        assert_eq!(next(&mut feed).await.unwrap().name, "Trip");

        let other = Keys::generate();
        let mut newer = engine.cached_list(&id).unwrap();
        newer.name = "Trip v2".to_string();
        newer.updated_at = newer.updated_at + ChronoDuration::seconds(5);
        let event = encode_list(&other, &newer).unwrap();
        relay.inject(event.clone());
        relay.deliver(&event);
        relay.deliver(&event);

        assert_eq!(next(&mut feed).await.unwrap().name, "Trip v2");
        settle().await;
        assert!(feed.try_next().is_none());
    }

    #[tokio::test]
    async fn tampered_events_are_dropped() {
        let (network, relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();
        let mut feed = engine.watch_list(&id).await.unwrap();
        next(&mut feed).await.unwrap();

        let mut newer = engine.cached_list(&id).unwrap();
        newer.updated_at = newer.updated_at + ChronoDuration::seconds(5);
        newer.name = "Forged".to_string();
        let mut forged = encode_list(&Keys::generate(), &newer).unwrap();
        forged.content = forged.content.replace("Forged", "Hijacked");
        relay.deliver(&forged);
        settle().await;
        assert!(feed.try_next().is_none());
        assert_eq!(engine.cached_list(&id).unwrap().name, "Trip");
    }

    #[tokio::test]
    async fn shutdown_ends_every_feed() {
        let (network, relay) = network();
        let engine = online(&network, Keys::generate()).await;
        let id = engine.create_list("Trip", trip_items()).await.unwrap();
        let mut feed = engine.watch_list(&id).await.unwrap();
        let mut owned = engine.fetch_owned_lists().await.unwrap();

        engine.shutdown().await;

        assert!(feed.next().await.is_none());
        assert!(owned.updates.next().await.is_none());
        assert!(feed.is_closed());
        assert_eq!(relay.connection_count(), 0);
    }
}
