//! Initialize identity and configuration.

use anyhow::{Context, Result};
use listsync_client::identity::IDENTITY_KEY;
use listsync_client::{FileStore, IdentityStore, KeyValueStore};
use std::path::Path;
use std::sync::Arc;

use crate::config::{set_dir_permissions_0700, CliConfig};

/// Run the init command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));

    // Check if already initialized
    if store.get(IDENTITY_KEY).await?.is_some() {
        anyhow::bail!(
            "Already initialized. Delete {} to start over with a new key.",
            data_dir.join(IDENTITY_KEY).display()
        );
    }

    set_dir_permissions_0700(data_dir).await?;
    let keys = IdentityStore::new(store)
        .get_or_create()
        .await
        .context("Failed to create identity")?;
    if !CliConfig::exists(data_dir) {
        CliConfig::default().save(data_dir).await?;
    }

    let public_key = keys.public_key();
    println!("Identity created!");
    println!();
    println!("  Public key: {}", public_key.to_npub());
    println!("  Share as:   {}", public_key.to_uri());
    println!("  Data dir:   {}", data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Create a list: listsync create \"Weekly shop\" --item Milk:1:gallon:dairy");
    println!("  2. Share it:      listsync share <list-id> <npub>");

    Ok(())
}
