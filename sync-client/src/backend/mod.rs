//! Relay backends: where signed events go and come from.
//!
//! Two implementations sit behind [`RelayBackend`]:
//! - [`RelayPool`] talks to real relay endpoints through a [`Transport`]
//!   per endpoint (WebSocket in production, mock in tests).
//! - [`LocalBackend`] keeps events in the local key-value store and always
//!   succeeds, for running without any network.
//!
//! The engine picks one at construction and never needs to know which.
//!
//! [`Transport`]: crate::transport::Transport

mod local;
mod pool;

pub use local::{LocalBackend, LOCAL_EVENTS_KEY};
pub use pool::{PoolConfig, RelayPool, DEFAULT_TIMEOUT};

use async_trait::async_trait;
use listsync_core::RelayState;
use listsync_types::event::TAG_D;
use listsync_types::{Event, EventId, Filter, SubscriptionId};
use thiserror::Error;

use crate::subscription::Subscription;

/// Backend errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No endpoint is connected.
    #[error("offline: no relay connected")]
    Offline,

    /// Every connected endpoint rejected the event or failed to answer.
    #[error("publish rejected by every relay: {0}")]
    PublishRejected(String),

    /// The backend has been shut down.
    #[error("backend shut down")]
    ShutDown,
}

/// Connection state of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    /// Endpoint URL.
    pub url: String,
    /// Current state.
    pub state: RelayState,
}

/// A place to publish, query and subscribe to signed events.
#[async_trait]
pub trait RelayBackend: Send + Sync {
    /// Connect to `endpoints`, returning the resulting state of each.
    ///
    /// Failures are reported in the status list, never as an error: zero
    /// connected endpoints means offline mode.
    async fn connect(&self, endpoints: &[String]) -> Vec<EndpointStatus>;

    /// Whether at least one endpoint is usable.
    fn is_connected(&self) -> bool;

    /// Current state of every known endpoint.
    fn status(&self) -> Vec<EndpointStatus>;

    /// Publish an event, returning once one endpoint has accepted it.
    async fn publish(&self, event: Event) -> Result<EventId, PoolError>;

    /// Fetch stored events matching `filter`, deduplicated by id.
    ///
    /// Returns an empty set when offline or when every endpoint fails.
    async fn query(&self, filter: Filter) -> Vec<Event>;

    /// Open a long-lived subscription. Each event id is delivered at most once.
    async fn subscribe(&self, filter: Filter) -> Result<Subscription, PoolError>;

    /// Close a subscription by id. Idempotent.
    async fn unsubscribe(&self, id: &SubscriptionId);

    /// Close every subscription and connection.
    async fn shutdown(&self);
}

/// Store with parameterized-replaceable semantics: one event per
/// `(kind, pubkey, d)`, the latest `created_at` winning. Equal timestamps
/// keep the lowest event id, as NIP-01 relays do. Returns whether the event
/// was stored.
pub(crate) fn store_replaceable(events: &mut Vec<Event>, event: Event) -> bool {
    if events.iter().any(|e| e.id == event.id) {
        return false;
    }
    let d = event.tag_value(TAG_D).map(str::to_string);
    let slot = events.iter().position(|e| {
        e.kind == event.kind && e.pubkey == event.pubkey && e.tag_value(TAG_D) == d.as_deref()
    });
    if let Some(pos) = slot {
        let stored = &events[pos];
        let newer = event.created_at > stored.created_at
            || (event.created_at == stored.created_at && event.id < stored.id);
        if !newer {
            return false;
        }
        events.remove(pos);
    }
    events.push(event);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_event;
    use crate::identity::Keys;
    use listsync_types::{Kind, Tag};

    fn ev(keys: &Keys, d: &str, created_at: u64) -> Event {
        sign_event(
            keys,
            Kind::List,
            vec![Tag::new(TAG_D, d)],
            created_at.to_string(),
            created_at,
        )
    }

    #[test]
    fn replaceable_store_keeps_latest_per_slot() {
        let keys = Keys::generate();
        let mut events = Vec::new();

        assert!(store_replaceable(&mut events, ev(&keys, "a", 10)));
        assert!(store_replaceable(&mut events, ev(&keys, "a", 20)));
        assert!(!store_replaceable(&mut events, ev(&keys, "a", 15)));
        assert!(store_replaceable(&mut events, ev(&keys, "b", 1)));

        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.created_at == 20));
    }

    #[test]
    fn replaceable_store_breaks_ties_by_lowest_id() {
        let keys = Keys::generate();
        let mut first = ev(&keys, "a", 10);
        let mut second = sign_event(
            &keys,
            Kind::List,
            vec![Tag::new(TAG_D, "a")],
            "other".to_string(),
            10,
        );
        if second.id > first.id {
            std::mem::swap(&mut first, &mut second);
        }
        // `second` now has the lower id

        let mut events = Vec::new();
        assert!(store_replaceable(&mut events, second.clone()));
        assert!(!store_replaceable(&mut events, first.clone()));
        assert_eq!(events, vec![second.clone()]);

        let mut events = Vec::new();
        assert!(store_replaceable(&mut events, first));
        assert!(store_replaceable(&mut events, second.clone()));
        assert_eq!(events, vec![second]);
    }

    #[test]
    fn replaceable_store_ignores_exact_duplicates() {
        let keys = Keys::generate();
        let event = ev(&keys, "a", 10);
        let mut events = Vec::new();

        assert!(store_replaceable(&mut events, event.clone()));
        assert!(!store_replaceable(&mut events, event));
        assert_eq!(events.len(), 1);
    }
}
