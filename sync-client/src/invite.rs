//! Sharing lists with other keys.
//!
//! The sender publishes an INVITE event tagged with the recipient's key;
//! the recipient listens for invites addressed to it and, on accepting,
//! follows the list like any other. Declining is local: the sender is never
//! told.

use chrono::Utc;
use listsync_core::InviteInbox;
use listsync_types::event::TYPE_LIST_INVITE;
use listsync_types::{Filter, Kind, ListId, ListInvite, PublicKey};

use crate::backend::PoolError;
use crate::codec::{encode_invite, open_invite};
use crate::engine::{offline, EngineError, InviteFeed, ListFeed, SyncEngine};

impl SyncEngine {
    /// Invite `recipient` to a list.
    ///
    /// `recipient` may be hex, `npub1…`, or either behind `nostr:`. Returns
    /// `Ok(false)` when every relay rejected the invite.
    pub async fn share_list(
        &self,
        list_id: &ListId,
        list_name: &str,
        recipient: &str,
    ) -> Result<bool, EngineError> {
        let recipient = PublicKey::parse(recipient)
            .map_err(|_| EngineError::InvalidRecipientKey(recipient.trim().to_string()))?;
        self.get_list(list_id).await?;

        let invite = ListInvite {
            list_id: list_id.clone(),
            list_name: list_name.to_string(),
            sender_public_key: self.public_key(),
            created_at: Utc::now(),
        };
        let event = encode_invite(self.keys(), &invite, &recipient)?;

        match self.backend().publish(event).await {
            Ok(_) => {
                tracing::info!(list = %list_id, to = %recipient.short(), "Shared list");
                Ok(true)
            }
            Err(PoolError::PublishRejected(reason)) => {
                tracing::warn!(list = %list_id, %reason, "Invite rejected by every relay");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Invites addressed to this key, stored and future.
    ///
    /// Needs a live connection. The same list may be offered more than once;
    /// an [`InviteInbox`] suppresses repeats.
    pub async fn listen_for_invites(&self) -> Result<InviteFeed, EngineError> {
        if !self.is_online() {
            return Err(EngineError::Offline);
        }
        let filter = Filter::new()
            .kind(Kind::Invite)
            .recipient(&self.public_key())
            .type_tag(TYPE_LIST_INVITE);
        let subscription = self.backend().subscribe(filter).await.map_err(offline)?;

        Ok(self.spawn_feed(subscription, Vec::new(), |_, event| {
            match open_invite(event) {
                Ok(invite) => Some(invite),
                Err(e) => {
                    tracing::warn!(event = %event.id, error = %e, "Dropping invite event");
                    None
                }
            }
        }))
    }

    /// Start following an invited list.
    pub async fn accept_invite(&self, invite: &ListInvite) -> Result<ListFeed, EngineError> {
        tracing::info!(
            list = %invite.list_id,
            from = %invite.sender_public_key.short(),
            "Accepted invite"
        );
        self.watch_list(&invite.list_id).await
    }

    /// Forget an invite. Returns whether it was pending.
    pub fn decline_invite(&self, inbox: &mut InviteInbox, list_id: &ListId) -> bool {
        inbox.decline(list_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PoolConfig, RelayBackend, RelayPool};
    use crate::identity::Keys;
    use crate::store::MemoryStore;
    use crate::engine::{EngineConfig, Feed};
    use crate::transport::MockNetwork;
    use listsync_types::Item;
    use std::sync::Arc;
    use std::time::Duration;

    const RELAY: &str = "wss://relay.test";

    async fn online(network: &MockNetwork) -> SyncEngine {
        let network = network.clone();
        let config = PoolConfig::default()
            .with_connect_timeout(Duration::from_millis(100))
            .with_publish_timeout(Duration::from_millis(100))
            .with_query_timeout(Duration::from_millis(200));
        let backend: Arc<dyn RelayBackend> =
            Arc::new(RelayPool::new(move |_| network.transport(), config));
        let engine = SyncEngine::open(
            backend,
            Keys::generate(),
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
        )
        .await
        .unwrap();
        engine.connect(&[RELAY.to_string()]).await;
        engine
    }

    async fn next<T>(feed: &mut Feed<T>) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(1), feed.next())
            .await
            .ok()
            .flatten()
    }

    // ===========================================
    // Trip scenario
    // ===========================================

    #[tokio::test]
    async fn shared_list_reaches_recipient_and_stays_in_sync() {
        let network = MockNetwork::new();
        network.add_relay(RELAY);
        let alice = online(&network).await;
        let bob = online(&network).await;

        let mut invites = bob.listen_for_invites().await.unwrap();

        let id = alice
            .create_list("Trip", vec![Item::new("Tent", 1.0, "", "camping")])
            .await
            .unwrap();
        let shared = alice
            .share_list(&id, "Trip", &bob.public_key().to_uri())
            .await
            .unwrap();
        assert!(shared);

        let invite = next(&mut invites).await.unwrap();
        assert_eq!(invite.list_id, id);
        assert_eq!(invite.list_name, "Trip");
        assert_eq!(invite.sender_public_key, alice.public_key());

        let mut inbox = InviteInbox::new();
        assert!(inbox.receive(invite.clone()));
        let accepted = inbox.accept(&invite.list_id).unwrap();

        let mut feed = bob.accept_invite(&accepted).await.unwrap();
        let first = next(&mut feed).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.owner, alice.public_key());

        alice
            .update_list(
                &id,
                "Trip",
                vec![
                    Item::new("Tent", 1.0, "", "camping"),
                    Item::new("Stove", 1.0, "", "camping"),
                ],
            )
            .await
            .unwrap();
        let second = next(&mut feed).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(bob.cached_list(&id).unwrap(), second);

        // Bob's edits flow back the same way
        let mut alice_feed = alice.watch_list(&id).await.unwrap();
        next(&mut alice_feed).await.unwrap();
        bob.remove_item(&id, "Trip", "Tent").await.unwrap();
        let back = next(&mut alice_feed).await.unwrap();
        assert_eq!(back.items, vec![Item::new("Stove", 1.0, "", "camping")]);
    }

    // ===========================================
    // Error paths
    // ===========================================

    #[tokio::test]
    async fn invalid_recipient_never_touches_the_network() {
        let network = MockNetwork::new();
        let relay = network.add_relay(RELAY);
        let alice = online(&network).await;
        let id = alice.create_list("Trip", vec![]).await.unwrap();
        let published = relay.published().len();

        for bad in ["", "npub1notakey", "nostr:xyz", "abcd"] {
            let result = alice.share_list(&id, "Trip", bad).await;
            assert!(matches!(result, Err(EngineError::InvalidRecipientKey(_))));
        }
        assert_eq!(relay.published().len(), published);
    }

    #[tokio::test]
    async fn rejected_invite_reports_false() {
        let network = MockNetwork::new();
        let relay = network.add_relay(RELAY);
        let alice = online(&network).await;
        let id = alice.create_list("Trip", vec![]).await.unwrap();

        relay.reject_publishes("blocked: invites disabled");
        let recipient = Keys::generate().public_key().to_hex();
        assert!(!alice.share_list(&id, "Trip", &recipient).await.unwrap());
    }

    #[tokio::test]
    async fn sharing_an_unknown_list_is_not_found() {
        let network = MockNetwork::new();
        network.add_relay(RELAY);
        let alice = online(&network).await;
        let recipient = Keys::generate().public_key().to_npub();

        let result = alice
            .share_list(&ListId::new("list_nope"), "Nope", &recipient)
            .await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn listening_offline_fails_fast() {
        let network = MockNetwork::new();
        let bob = online(&network).await;
        assert!(matches!(
            bob.listen_for_invites().await,
            Err(EngineError::Offline)
        ));
    }

    #[tokio::test]
    async fn invites_for_someone_else_are_not_delivered() {
        let network = MockNetwork::new();
        network.add_relay(RELAY);
        let alice = online(&network).await;
        let bob = online(&network).await;
        let mut invites = bob.listen_for_invites().await.unwrap();

        let id = alice.create_list("Trip", vec![]).await.unwrap();
        let carol = Keys::generate().public_key().to_hex();
        assert!(alice.share_list(&id, "Trip", &carol).await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(invites.try_next().is_none());
    }

    #[tokio::test]
    async fn declining_is_local() {
        let network = MockNetwork::new();
        let relay = network.add_relay(RELAY);
        let bob = online(&network).await;
        let invite = ListInvite {
            list_id: ListId::new("list_1"),
            list_name: "Trip".into(),
            sender_public_key: Keys::generate().public_key(),
            created_at: Utc::now(),
        };
        let mut inbox = InviteInbox::new();
        inbox.receive(invite.clone());
        let published = relay.published().len();

        assert!(bob.decline_invite(&mut inbox, &invite.list_id));
        assert!(!bob.decline_invite(&mut inbox, &invite.list_id));
        assert!(inbox.is_empty());
        assert_eq!(relay.published().len(), published);
    }
}
