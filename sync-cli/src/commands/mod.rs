//! CLI command implementations.

pub mod init;
pub mod invites;
pub mod lists;
pub mod share;
pub mod status;

use anyhow::{Context, Result};
use listsync_client::identity::IDENTITY_KEY;
use listsync_client::{
    EndpointStatus, FileStore, IdentityStore, KeyValueStore, LocalBackend, RelayBackend, RelayPool,
    SyncEngine,
};
use listsync_types::{GroceryList, Item};
use std::path::Path;
use std::sync::Arc;

use crate::config::{BackendKind, CliConfig};

/// An opened engine plus what the commands need around it.
pub struct Session {
    /// The engine, connected per the configuration.
    pub engine: SyncEngine,
    /// The data directory store.
    pub store: Arc<dyn KeyValueStore>,
    /// Loaded configuration.
    pub config: CliConfig,
    /// Connection result per relay.
    pub connected: Vec<EndpointStatus>,
}

impl Session {
    /// Load identity and configuration from `data_dir` and connect.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let config = CliConfig::load(data_dir).await?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));

        if store.get(IDENTITY_KEY).await?.is_none() {
            anyhow::bail!("Not initialized. Run 'listsync init' first.");
        }
        let keys = IdentityStore::new(store.clone())
            .get_or_create()
            .await
            .context("Failed to load identity")?;

        let backend: Arc<dyn RelayBackend> = match config.backend {
            BackendKind::Relays => Arc::new(RelayPool::websocket(config.pool_config())),
            BackendKind::Local => Arc::new(
                LocalBackend::open(store.clone())
                    .await
                    .context("Failed to open local backend")?,
            ),
        };
        let engine = SyncEngine::open(backend, keys, store.clone(), config.engine_config())
            .await
            .context("Failed to open sync engine")?;
        let connected = engine.connect(&config.relays).await;
        if !engine.is_online() {
            println!("(offline: no relay reachable, showing cached data)");
        }

        Ok(Self {
            engine,
            store,
            config,
            connected,
        })
    }

    /// Release every connection.
    pub async fn close(self) {
        self.engine.shutdown().await;
    }
}

/// Parse `name[:qty[:unit[:aisle]]]`, e.g. `Milk:1:gallon:dairy`.
pub fn parse_item(input: &str) -> Result<Item> {
    let mut parts = input.splitn(4, ':');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        anyhow::bail!("Item name must not be empty: {:?}", input);
    }
    let qty = match parts.next().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => q
            .parse::<f64>()
            .with_context(|| format!("Invalid quantity {:?} for {}", q, name))?,
        None => 1.0,
    };
    if !qty.is_finite() {
        anyhow::bail!("Invalid quantity {:?} for {}: must be a finite number", qty, name);
    }
    let unit = parts.next().unwrap_or_default().trim();
    let aisle = parts.next().unwrap_or_default().trim();
    Ok(Item::new(name, qty, unit, aisle))
}

/// Print a list with its items.
pub fn print_list(list: &GroceryList) {
    println!("{} ({})", list.name, list.id);
    println!(
        "  Owner:   {}   Updated: {}",
        list.owner.short(),
        list.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if list.items.is_empty() {
        println!("  (no items)");
    }
    for item in &list.items {
        let mut line = format!("  - {} x{}", item.name, item.qty);
        if !item.unit.is_empty() {
            line.push(' ');
            line.push_str(&item.unit);
        }
        if !item.aisle.is_empty() {
            line.push_str(&format!("  [{}]", item.aisle));
        }
        println!("{}", line);
    }
}
