//! Subscription filters used by REQ messages.

use serde::{Deserialize, Serialize};

use crate::event::{TAG_D, TAG_P, TAG_TYPE};
use crate::{Event, EventId, Kind, ListId, PublicKey};

/// Selects events by id, kind, author, tag equality and age.
///
/// Unset fields match everything; set fields must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Exact event ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<EventId>>,
    /// Event kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<Kind>>,
    /// Event authors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<PublicKey>>,
    /// Values of the `d` tag.
    #[serde(rename = "#d", default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Vec<String>>,
    /// Values of the `p` tag.
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<String>>,
    /// Values of the `type` tag.
    #[serde(rename = "#type", default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<Vec<String>>,
    /// Only events with `created_at >= since`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Maximum number of stored events a relay should return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// An empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event id.
    pub fn id(mut self, id: EventId) -> Self {
        self.ids.get_or_insert_with(Vec::new).push(id);
        self
    }

    /// Add a kind.
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    /// Add an author.
    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(author);
        self
    }

    /// Add a `d` tag value.
    pub fn list_id(mut self, list_id: &ListId) -> Self {
        self.d
            .get_or_insert_with(Vec::new)
            .push(list_id.as_str().to_string());
        self
    }

    /// Add a `p` tag value.
    pub fn recipient(mut self, recipient: &PublicKey) -> Self {
        self.p.get_or_insert_with(Vec::new).push(recipient.to_hex());
        self
    }

    /// Add a `type` tag value.
    pub fn type_tag(mut self, value: &str) -> Self {
        self.r#type
            .get_or_insert_with(Vec::new)
            .push(value.to_string());
        self
    }

    /// Only events created at or after `since` (unix seconds).
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Cap the number of stored events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every constraint of this filter.
    ///
    /// `limit` is a hint for stored-event queries and is not checked here.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        tag_matches(event, TAG_D, &self.d)
            && tag_matches(event, TAG_P, &self.p)
            && tag_matches(event, TAG_TYPE, &self.r#type)
    }
}

fn tag_matches(event: &Event, key: &str, wanted: &Option<Vec<String>>) -> bool {
    match wanted {
        None => true,
        Some(values) => event
            .tag_values(key)
            .any(|v| values.iter().any(|w| w == v)),
    }
}
