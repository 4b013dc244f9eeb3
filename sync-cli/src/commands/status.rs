//! Show identity, connection and cache status.

use anyhow::Result;
use listsync_client::identity::IDENTITY_KEY;
use listsync_client::{FileStore, KeyValueStore};
use listsync_core::RelayState;
use std::path::Path;

use super::{invites, Session};
use crate::config::BackendKind;

/// What the status command found.
#[derive(Debug, Default)]
pub struct StatusReport {
    /// Whether an identity exists in the data directory.
    pub initialized: bool,
    /// Relays that ended up connected.
    pub connected: usize,
    /// Lists in the local cache.
    pub cached_lists: usize,
    /// Invites waiting for accept or decline.
    pub pending_invites: usize,
}

/// Run the status command.
pub async fn run(data_dir: &Path) -> Result<StatusReport> {
    println!("=== listsync status ===");
    println!();

    let store = FileStore::new(data_dir);
    if store.get(IDENTITY_KEY).await?.is_none() {
        println!("Identity: NOT INITIALIZED");
        println!();
        println!("Run 'listsync init' to create one.");
        return Ok(StatusReport::default());
    }

    let session = Session::open(data_dir).await?;
    let public_key = session.engine.public_key();
    println!("Identity:");
    println!("  Public key: {}", public_key.to_npub());
    println!("  Data dir:   {}", data_dir.display());
    println!();

    let statuses = session.engine.status();
    match session.config.backend {
        BackendKind::Local => println!("Backend: local (this machine only)"),
        BackendKind::Relays => {
            println!("Relays: {} configured", session.config.relays.len());
        }
    }
    for status in &statuses {
        match &status.state {
            RelayState::Failed { error } => {
                println!("  [{}] {} ({})", status.state.label(), status.url, error)
            }
            state => println!("  [{}] {}", state.label(), status.url),
        }
    }
    let connected = statuses.iter().filter(|s| s.state.is_connected()).count();
    println!();

    let lists = session.engine.cached_lists();
    let owned = lists.iter().filter(|l| l.owner == public_key).count();
    let pending_invites = invites::pending_count(session.store.as_ref()).await?;
    println!("Cache:");
    println!("  Lists:   {} ({} owned, {} shared)", lists.len(), owned, lists.len() - owned);
    println!("  Invites: {} pending", pending_invites);

    session.close().await;
    Ok(StatusReport {
        initialized: true,
        connected,
        cached_lists: lists.len(),
        pending_invites,
    })
}
