//! Local-only backend: a relay simulated in the key-value store.
//!
//! Events are kept with the same replaceable semantics a relay applies and
//! written back to the store after every publish. It is always connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use listsync_core::RelayState;
use listsync_types::{Event, EventId, Filter, SubscriptionId};
use tokio::sync::mpsc;

use super::{store_replaceable, EndpointStatus, PoolError, RelayBackend};
use crate::store::{KeyValueStore, StoreError};
use crate::subscription::{Subscription, SubscriptionHandle};

/// Store key for the simulated relay contents.
pub const LOCAL_EVENTS_KEY: &str = "local.events";

const LOCAL_URL: &str = "local";

struct Live {
    filter: Filter,
    tx: mpsc::UnboundedSender<Event>,
    handle: SubscriptionHandle,
}

type LiveMap = Arc<Mutex<HashMap<SubscriptionId, Live>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Backend that never leaves the device.
pub struct LocalBackend {
    store: Arc<dyn KeyValueStore>,
    events: tokio::sync::Mutex<Vec<Event>>,
    live: LiveMap,
    shut_down: AtomicBool,
}

impl LocalBackend {
    /// Open the backend, loading any events persisted in `store`.
    ///
    /// Unreadable contents are logged and discarded.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let events = match store.get(LOCAL_EVENTS_KEY).await? {
            Some(json) => match serde_json::from_str::<Vec<Event>>(&json) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable local events");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        tracing::debug!(count = events.len(), "Local backend opened");

        Ok(Self {
            store,
            events: tokio::sync::Mutex::new(events),
            live: Arc::new(Mutex::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        })
    }

    fn fan_out(&self, event: &Event) {
        for live in lock(&self.live).values() {
            if live.filter.matches(event) {
                let _ = live.tx.send(event.clone());
            }
        }
    }
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("subscriptions", &lock(&self.live).len())
            .finish()
    }
}

#[async_trait]
impl RelayBackend for LocalBackend {
    async fn connect(&self, _endpoints: &[String]) -> Vec<EndpointStatus> {
        self.status()
    }

    fn is_connected(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst)
    }

    fn status(&self) -> Vec<EndpointStatus> {
        let state = if self.is_connected() {
            RelayState::Connected
        } else {
            RelayState::Disconnected
        };
        vec![EndpointStatus {
            url: LOCAL_URL.to_string(),
            state,
        }]
    }

    async fn publish(&self, event: Event) -> Result<EventId, PoolError> {
        if !self.is_connected() {
            return Err(PoolError::ShutDown);
        }
        let id = event.id;
        let mut events = self.events.lock().await;
        let mut next = events.clone();
        if !store_replaceable(&mut next, event.clone()) {
            return Ok(id);
        }

        let json = serde_json::to_string(&next)
            .map_err(|e| PoolError::PublishRejected(e.to_string()))?;
        self.store
            .put(LOCAL_EVENTS_KEY, &json)
            .await
            .map_err(|e| PoolError::PublishRejected(e.to_string()))?;
        *events = next;

        // Still under the events lock, so a concurrent subscribe sees this
        // event exactly once: replayed or fanned out, never both
        self.fan_out(&event);
        Ok(id)
    }

    async fn query(&self, filter: Filter) -> Vec<Event> {
        let events = self.events.lock().await;
        let mut matching: Vec<Event> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, PoolError> {
        if !self.is_connected() {
            return Err(PoolError::ShutDown);
        }
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        // Replay stored matches first, like a relay answering REQ
        let events = self.events.lock().await;
        for event in events.iter().filter(|e| filter.matches(e)) {
            let _ = tx.send(event.clone());
        }

        let live = Arc::clone(&self.live);
        let hook_id = id.clone();
        let handle = SubscriptionHandle::new(id.clone(), move || {
            lock(&live).remove(&hook_id);
        });
        lock(&self.live).insert(
            id,
            Live {
                filter,
                tx,
                handle: handle.clone(),
            },
        );
        drop(events);
        Ok(Subscription::new(rx, handle))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        let live = lock(&self.live).remove(id);
        if let Some(live) = live {
            live.handle.close();
        }
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let live: Vec<Live> = lock(&self.live).drain().map(|(_, l)| l).collect();
        for entry in live {
            entry.handle.close();
        }
    }
}
