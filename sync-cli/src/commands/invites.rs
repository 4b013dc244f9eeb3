//! Receive, accept and decline list invites.
//!
//! Pending invites live in the inbox under the data directory, so an
//! invite seen once stays listed until it is accepted or declined.

use anyhow::{Context, Result};
use listsync_client::{FileStore, KeyValueStore};
use listsync_types::{GroceryList, ListId, ListInvite};
use std::path::Path;
use std::time::Duration;

use super::{print_list, Session};
use crate::config::{load_inbox, save_inbox};

/// Run the invites command: listen for `wait`, then print what is pending.
pub async fn list(data_dir: &Path, wait: Duration) -> Result<Vec<ListInvite>> {
    let session = Session::open(data_dir).await?;
    let mut inbox = load_inbox(session.store.as_ref()).await?;

    if session.engine.is_online() {
        match session.engine.listen_for_invites().await {
            Ok(mut feed) => {
                let deadline = tokio::time::Instant::now() + wait;
                while let Ok(Some(invite)) = tokio::time::timeout_at(deadline, feed.next()).await {
                    if inbox.receive(invite) {
                        tracing::debug!("New invite");
                    }
                }
            }
            Err(e) => println!("Cannot listen for invites: {}", e),
        }
        save_inbox(session.store.as_ref(), &inbox).await?;
    }
    session.close().await;

    if inbox.is_empty() {
        println!("No pending invites.");
    }
    for invite in inbox.pending() {
        println!(
            "{}  \"{}\" from {}",
            invite.list_id,
            invite.list_name,
            invite.sender_public_key.short()
        );
    }
    Ok(inbox.pending().to_vec())
}

/// Run the accept command: follow the list until its first version arrives.
pub async fn accept(data_dir: &Path, list_id: &str) -> Result<GroceryList> {
    let list_id = ListId::new(list_id);
    let session = Session::open(data_dir).await?;
    let mut inbox = load_inbox(session.store.as_ref()).await?;

    let Some(invite) = inbox.get(&list_id).cloned() else {
        session.close().await;
        anyhow::bail!("No pending invite for {}. Run 'listsync invites' first.", list_id);
    };

    let wait = Duration::from_secs(session.config.query_timeout_secs);
    let first = match session.engine.accept_invite(&invite).await {
        Ok(mut feed) => tokio::time::timeout(wait, feed.next()).await.ok().flatten(),
        Err(e) => {
            session.close().await;
            return Err(e).context("Failed to accept invite");
        }
    };
    let Some(list) = first else {
        session.close().await;
        anyhow::bail!("The list is not available on any relay yet. Try again later.");
    };

    inbox.accept(&list_id);
    save_inbox(session.store.as_ref(), &inbox).await?;
    session.close().await;

    println!("Accepted invite from {}", invite.sender_public_key.short());
    println!();
    print_list(&list);
    Ok(list)
}

/// Run the decline command. The sender is not notified.
pub async fn decline(data_dir: &Path, list_id: &str) -> Result<()> {
    let store = FileStore::new(data_dir);
    let mut inbox = load_inbox(&store).await?;

    if !inbox.decline(&ListId::new(list_id)) {
        anyhow::bail!("No pending invite for {}", list_id);
    }
    save_inbox(&store, &inbox).await?;
    println!("Declined.");
    Ok(())
}

/// Whether any invites are waiting, without touching the network.
pub async fn pending_count(store: &dyn KeyValueStore) -> Result<usize> {
    Ok(load_inbox(store).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::local_data_dir;
    use crate::commands::{lists, share};
    use listsync_client::{FileStore, IdentityStore};
    use std::sync::Arc;

    async fn own_npub(data_dir: &Path) -> String {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));
        IdentityStore::new(store)
            .get_or_create()
            .await
            .unwrap()
            .public_key()
            .to_npub()
    }

    #[tokio::test]
    async fn invite_lifecycle() {
        let dir = local_data_dir().await;
        let id = lists::create(dir.path(), "Trip", &["Tent".into()])
            .await
            .unwrap();
        // The local backend is one shared relay, so inviting ourselves
        // exercises the full path
        let me = own_npub(dir.path()).await;
        assert!(share::run(dir.path(), id.as_str(), &me).await.unwrap());

        let pending = list(dir.path(), Duration::from_millis(200)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].list_id, id);

        // Listening again does not duplicate the invite
        let pending = list(dir.path(), Duration::from_millis(200)).await.unwrap();
        assert_eq!(pending.len(), 1);

        let accepted = accept(dir.path(), id.as_str()).await.unwrap();
        assert_eq!(accepted.id, id);
        assert_eq!(
            pending_count(&FileStore::new(dir.path())).await.unwrap(),
            0
        );
        assert!(accept(dir.path(), id.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn decline_unknown_invite_fails() {
        let dir = local_data_dir().await;
        assert!(decline(dir.path(), "list_nope").await.is_err());
    }

    #[tokio::test]
    async fn decline_removes_pending_invite() {
        let dir = local_data_dir().await;
        let id = lists::create(dir.path(), "Trip", &[]).await.unwrap();
        let me = own_npub(dir.path()).await;
        share::run(dir.path(), id.as_str(), &me).await.unwrap();
        list(dir.path(), Duration::from_millis(200)).await.unwrap();

        decline(dir.path(), id.as_str()).await.unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(pending_count(&store).await.unwrap(), 0);

        // A replay of the same invite stays suppressed
        let pending = list(dir.path(), Duration::from_millis(200)).await.unwrap();
        assert!(pending.is_empty());
    }
}
