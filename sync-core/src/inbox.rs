//! Local inbox of pending list invites.
//!
//! Relays replay stored invites every time we listen, so the inbox
//! suppresses duplicates by list id and remembers which invites were
//! already accepted or declined. Declining is purely local; the sender is
//! never told.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use listsync_types::{ListId, ListInvite};

/// Pending invites plus the handled-invite memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteInbox {
    pending: Vec<ListInvite>,
    /// `created_at` of the latest invite handled per list.
    #[serde(default)]
    handled: BTreeMap<ListId, DateTime<Utc>>,
}

impl InviteInbox {
    /// An empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an incoming invite.
    ///
    /// Returns `false` (and changes nothing) when an invite for the same list
    /// is already pending, or when an invite at least this recent was already
    /// accepted or declined.
    pub fn receive(&mut self, invite: ListInvite) -> bool {
        if self.pending.iter().any(|p| p.list_id == invite.list_id) {
            return false;
        }
        if let Some(handled_at) = self.handled.get(&invite.list_id) {
            if invite.created_at <= *handled_at {
                return false;
            }
        }
        self.pending.push(invite);
        true
    }

    /// Pending invites in arrival order.
    pub fn pending(&self) -> &[ListInvite] {
        &self.pending
    }

    /// Look up a pending invite.
    pub fn get(&self, list_id: &ListId) -> Option<&ListInvite> {
        self.pending.iter().find(|p| &p.list_id == list_id)
    }

    /// Remove and return a pending invite so the caller can accept it.
    pub fn accept(&mut self, list_id: &ListId) -> Option<ListInvite> {
        self.take(list_id)
    }

    /// Drop a pending invite. Returns whether one was pending.
    pub fn decline(&mut self, list_id: &ListId) -> bool {
        self.take(list_id).is_some()
    }

    /// Number of pending invites.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Serialize for persistence.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restore from [`InviteInbox::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn take(&mut self, list_id: &ListId) -> Option<ListInvite> {
        let pos = self.pending.iter().position(|p| &p.list_id == list_id)?;
        let invite = self.pending.remove(pos);
        self.handled
            .insert(invite.list_id.clone(), invite.created_at);
        Some(invite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use listsync_types::PublicKey;

    fn invite(list: &str, secs: i64) -> ListInvite {
        ListInvite {
            list_id: ListId::new(list),
            list_name: format!("{} name", list),
            sender_public_key: PublicKey::from_bytes(&[5; 32]).unwrap(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn receive_suppresses_duplicates_by_list_id() {
        let mut inbox = InviteInbox::new();
        assert!(inbox.receive(invite("a", 1)));
        assert!(!inbox.receive(invite("a", 1)));
        assert!(!inbox.receive(invite("a", 2)));
        assert!(inbox.receive(invite("b", 1)));
        assert_eq!(inbox.len(), 2);
    }

    #[test]
    fn accept_removes_and_returns() {
        let mut inbox = InviteInbox::new();
        inbox.receive(invite("a", 1));

        let accepted = inbox.accept(&ListId::new("a")).unwrap();
        assert_eq!(accepted.list_name, "a name");
        assert!(inbox.is_empty());
        assert!(inbox.accept(&ListId::new("a")).is_none());
    }

    #[test]
    fn decline_is_local_and_idempotent() {
        let mut inbox = InviteInbox::new();
        inbox.receive(invite("a", 1));

        assert!(inbox.decline(&ListId::new("a")));
        assert!(!inbox.decline(&ListId::new("a")));
        assert!(inbox.is_empty());
    }

    #[test]
    fn replayed_invite_stays_dismissed() {
        let mut inbox = InviteInbox::new();
        inbox.receive(invite("a", 10));
        inbox.decline(&ListId::new("a"));

        assert!(!inbox.receive(invite("a", 10)));
        assert!(!inbox.receive(invite("a", 5)));
        // A fresh re-share is shown again
        assert!(inbox.receive(invite("a", 11)));
    }

    #[test]
    fn persists_through_json() {
        let mut inbox = InviteInbox::new();
        inbox.receive(invite("a", 1));
        inbox.receive(invite("b", 2));
        inbox.decline(&ListId::new("b"));

        let restored = InviteInbox::from_json(&inbox.to_json().unwrap()).unwrap();
        assert_eq!(restored, inbox);
        assert!(restored.get(&ListId::new("a")).is_some());
        assert!(restored.get(&ListId::new("b")).is_none());
    }
}
