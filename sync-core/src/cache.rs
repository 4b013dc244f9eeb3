//! In-memory list cache.
//!
//! The cache is the engine's view of every list it has seen, keyed by list
//! id. It performs no merging of its own: `put` overwrites unconditionally,
//! and the last-write-wins policy lives in [`crate::merge`].

use std::collections::HashMap;

use listsync_types::{GroceryList, ListId, PublicKey};

/// Map of `ListId -> GroceryList`.
#[derive(Debug, Clone, Default)]
pub struct ListCache {
    lists: HashMap<ListId, GroceryList>,
}

impl ListCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cache from a snapshot.
    ///
    /// If the snapshot holds several versions of one list, the newest wins.
    pub fn restore(lists: Vec<GroceryList>) -> Self {
        let mut cache = Self::new();
        for list in lists {
            crate::merge::merge(&mut cache, list);
        }
        cache
    }

    /// Every cached list, newest first.
    pub fn snapshot(&self) -> Vec<GroceryList> {
        self.all()
    }

    /// Look up a list by id.
    pub fn get(&self, id: &ListId) -> Option<&GroceryList> {
        self.lists.get(id)
    }

    /// Store a list, replacing any cached version.
    pub fn put(&mut self, list: GroceryList) {
        self.lists.insert(list.id.clone(), list);
    }

    /// Drop a list.
    pub fn remove(&mut self, id: &ListId) -> Option<GroceryList> {
        self.lists.remove(id)
    }

    /// Lists owned by `owner`, sorted by `updated_at` descending.
    pub fn all_owned_by(&self, owner: &PublicKey) -> Vec<GroceryList> {
        sorted(self.lists.values().filter(|l| &l.owner == owner))
    }

    /// All lists, sorted by `updated_at` descending.
    pub fn all(&self) -> Vec<GroceryList> {
        sorted(self.lists.values())
    }

    /// Number of cached lists.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

fn sorted<'a>(lists: impl Iterator<Item = &'a GroceryList>) -> Vec<GroceryList> {
    let mut out: Vec<GroceryList> = lists.cloned().collect();
    // Ties broken by id so output is stable across HashMap iteration orders
    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    out
}
