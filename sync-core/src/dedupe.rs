//! Bounded set of already-delivered event ids.
//!
//! The same event arrives once per relay that stores it, and again whenever
//! a relay replays stored events. Each subscription keeps one of these so a
//! given event id is handed to the application at most once.

use std::collections::{HashSet, VecDeque};

use listsync_types::EventId;

/// Default number of ids remembered per subscription.
pub const DEFAULT_SEEN_CAPACITY: usize = 4096;

/// Remembers the most recent `capacity` event ids.
#[derive(Debug, Clone)]
pub struct SeenEvents {
    ids: HashSet<EventId>,
    order: VecDeque<EventId>,
    capacity: usize,
}

impl SeenEvents {
    /// Create a tracker with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }

    /// Create a tracker remembering at most `capacity` ids (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`. Returns `true` the first time an id is seen.
    pub fn insert(&mut self, id: EventId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    /// Whether `id` is currently remembered.
    pub fn contains(&self, id: &EventId) -> bool {
        self.ids.contains(id)
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::new()
    }
}
