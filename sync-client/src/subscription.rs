//! Channel-backed subscriptions with explicit, idempotent close.
//!
//! A [`Subscription`] owns the receiving end of a delivery channel; the
//! backend keeps the sending end in its routing table. Closing flips a
//! shared flag and runs the backend's cleanup once, which drops the sender
//! and wakes any pending [`Subscription::next`]. Nothing is delivered after
//! `close()` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use listsync_types::{Event, SubscriptionId};
use tokio::sync::mpsc;

type CloseHook = Box<dyn FnOnce() + Send>;

struct Liveness {
    closed: AtomicBool,
    on_close: Mutex<Option<CloseHook>>,
}

/// Cloneable handle that can close a subscription from anywhere.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    liveness: Arc<Liveness>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            liveness: Arc::new(Liveness {
                closed: AtomicBool::new(false),
                on_close: Mutex::new(Some(Box::new(on_close))),
            }),
        }
    }

    /// The subscription id.
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Whether the subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.liveness.closed.load(Ordering::SeqCst)
    }

    /// Close the subscription. Only the first call has any effect.
    pub fn close(&self) {
        if self.liveness.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let hook = self
            .liveness
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A long-lived stream of events matching a filter.
///
/// Dropping the subscription closes it.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Event>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>, handle: SubscriptionHandle) -> Self {
        Self { rx, handle }
    }

    /// The subscription id.
    pub fn id(&self) -> &SubscriptionId {
        self.handle.id()
    }

    /// A handle that can close this subscription from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Wait for the next event. `None` once closed.
    pub async fn next(&mut self) -> Option<Event> {
        if self.handle.is_closed() {
            return None;
        }
        let event = self.rx.recv().await?;
        // A delivery may race with close(); never hand it out afterwards
        if self.handle.is_closed() {
            return None;
        }
        Some(event)
    }

    /// Take an already-delivered event without waiting.
    pub fn try_next(&mut self) -> Option<Event> {
        if self.handle.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Close the subscription. Idempotent.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Whether the subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_types::{EventId, Kind, PublicKey};
    use std::sync::atomic::AtomicUsize;

    fn event(n: u8) -> Event {
        Event {
            id: EventId::from_digest([n; 32]),
            pubkey: PublicKey::from_bytes(&[n; 32]).unwrap(),
            created_at: 0,
            kind: Kind::List,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    fn counted() -> (Arc<AtomicUsize>, SubscriptionHandle) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let handle = SubscriptionHandle::new(SubscriptionId::from("s"), move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, handle)
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_, handle) = counted();
        let mut sub = Subscription::new(rx, handle);

        tx.send(event(1)).unwrap();
        tx.send(event(2)).unwrap();

        assert_eq!(sub.next().await.unwrap().id, event(1).id);
        assert_eq!(sub.try_next().unwrap().id, event(2).id);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_runs_hook_once() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (count, handle) = counted();
        let sub = Subscription::new(rx, handle.clone());

        sub.close();
        sub.close();
        handle.close();
        drop(sub);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_, handle) = counted();
        let mut sub = Subscription::new(rx, handle);

        tx.send(event(1)).unwrap();
        sub.close();
        // Delivered before close but not yet consumed
        assert!(sub.next().await.is_none());
        tx.send(event(2)).unwrap();
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn next_ends_when_sender_is_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_, handle) = counted();
        let mut sub = Subscription::new(rx, handle);

        drop(tx);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_closes_it() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (count, handle) = counted();
        drop(Subscription::new(rx, handle.clone()));

        assert!(handle.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
