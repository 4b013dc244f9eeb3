//! Last-write-wins merge of remote list versions into the cache.
//!
//! Granularity is the whole list: a newer version replaces every field,
//! including items another writer changed concurrently.

use listsync_types::GroceryList;

use crate::cache::ListCache;

/// What merging one incoming version did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The list was not cached before.
    Inserted,
    /// The incoming version was strictly newer and replaced the cached one.
    Replaced,
    /// The incoming version was not newer and was discarded.
    Stale,
}

impl MergeOutcome {
    /// Whether the cache changed (and subscribers should be notified).
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::Stale)
    }
}

/// Whether `incoming` should replace `cached`.
///
/// Equal timestamps keep the cached copy, so replays of the same version
/// are no-ops.
pub fn supersedes(incoming: &GroceryList, cached: &GroceryList) -> bool {
    incoming.updated_at > cached.updated_at
}

/// Merge one incoming version into the cache.
pub fn merge(cache: &mut ListCache, incoming: GroceryList) -> MergeOutcome {
    let outcome = match cache.get(&incoming.id) {
        None => MergeOutcome::Inserted,
        Some(cached) if supersedes(&incoming, cached) => MergeOutcome::Replaced,
        Some(_) => return MergeOutcome::Stale,
    };
    cache.put(incoming);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use listsync_types::{Item, ListId, PublicKey};

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn version(updated: i64, item: &str) -> GroceryList {
        let mut l = GroceryList::new(
            ListId::new("list_1"),
            "Trip",
            vec![Item::new(item, 1.0, "", "")],
            PublicKey::from_bytes(&[1; 32]).unwrap(),
            at(0),
        );
        l.updated_at = at(updated);
        l
    }

    #[test]
    fn unknown_list_is_inserted() {
        let mut cache = ListCache::new();
        assert_eq!(merge(&mut cache, version(10, "Milk")), MergeOutcome::Inserted);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn newer_version_replaces() {
        let mut cache = ListCache::new();
        merge(&mut cache, version(10, "Milk"));

        let outcome = merge(&mut cache, version(20, "Bread"));
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert!(outcome.changed());
        assert_eq!(cache.get(&ListId::new("list_1")).unwrap().items[0].name, "Bread");
    }

    #[test]
    fn older_version_is_discarded() {
        let mut cache = ListCache::new();
        merge(&mut cache, version(20, "Bread"));

        let outcome = merge(&mut cache, version(10, "Milk"));
        assert_eq!(outcome, MergeOutcome::Stale);
        assert!(!outcome.changed());
        assert_eq!(cache.get(&ListId::new("list_1")).unwrap().items[0].name, "Bread");
    }

    #[test]
    fn equal_timestamp_keeps_cached_copy() {
        let mut cache = ListCache::new();
        merge(&mut cache, version(20, "Bread"));

        assert_eq!(merge(&mut cache, version(20, "Milk")), MergeOutcome::Stale);
        assert_eq!(cache.get(&ListId::new("list_1")).unwrap().items[0].name, "Bread");
    }

    #[test]
    fn final_state_is_independent_of_arrival_order() {
        let versions = vec![version(10, "A"), version(30, "C"), version(20, "B")];

        // Every permutation of three versions
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut cache = ListCache::new();
            for i in order {
                merge(&mut cache, versions[i].clone());
            }
            let merged = cache.get(&ListId::new("list_1")).unwrap();
            assert_eq!(merged.updated_at, at(30), "order {:?}", order);
            assert_eq!(merged.items[0].name, "C", "order {:?}", order);
        }
    }

    #[test]
    fn replaying_a_version_is_a_no_op() {
        let mut cache = ListCache::new();
        let v = version(10, "Milk");
        merge(&mut cache, v.clone());
        assert_eq!(merge(&mut cache, v), MergeOutcome::Stale);
        assert_eq!(cache.len(), 1);
    }
}
