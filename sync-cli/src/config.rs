//! Configuration management for listsync.
//!
//! Configuration is loaded from `config.toml` in the data directory. Every
//! field has a default, so a missing file or a partial one is fine.

use anyhow::{Context, Result};
use listsync_client::{EngineConfig, KeyValueStore, PoolConfig};
use listsync_core::InviteInbox;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Store key for the invite inbox.
pub const INBOX_KEY: &str = "invites.inbox";

/// Where events are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Real relays over WebSocket.
    Relays,
    /// Simulated relay in the data directory; nothing leaves the machine.
    Local,
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Relay URLs to connect to.
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    /// Backend selection (default: relays).
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Per-relay connect timeout in seconds (default: 5).
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Publish acknowledgement timeout in seconds (default: 5).
    #[serde(default = "default_timeout_secs")]
    pub publish_timeout_secs: u64,
    /// Query timeout in seconds (default: 5).
    #[serde(default = "default_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Create a demo list the first time an online account has none.
    #[serde(default)]
    pub seed_default_list: bool,
}

fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".to_string(),
        "wss://nos.lol".to_string(),
    ]
}

fn default_backend() -> BackendKind {
    BackendKind::Relays
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            backend: default_backend(),
            connect_timeout_secs: default_timeout_secs(),
            publish_timeout_secs: default_timeout_secs(),
            query_timeout_secs: default_timeout_secs(),
            seed_default_list: false,
        }
    }
}

impl CliConfig {
    /// Load configuration from a directory, falling back to defaults.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read configuration")?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Save configuration to a directory.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(CONFIG_FILE);
        let contents = toml::to_string_pretty(self).context("Failed to encode configuration")?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save configuration")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if a config file exists.
    pub fn exists(data_dir: &Path) -> bool {
        data_dir.join(CONFIG_FILE).exists()
    }

    /// Relay pool timeouts.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_publish_timeout(Duration::from_secs(self.publish_timeout_secs))
            .with_query_timeout(Duration::from_secs(self.query_timeout_secs))
    }

    /// Engine options.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_seed_default_list(self.seed_default_list)
    }
}

/// Load the invite inbox. An unreadable inbox starts empty.
pub async fn load_inbox(store: &dyn KeyValueStore) -> Result<InviteInbox> {
    let stored = store
        .get(INBOX_KEY)
        .await
        .context("Failed to read invite inbox")?;
    Ok(match stored {
        Some(json) => InviteInbox::from_json(&json).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Discarding unreadable invite inbox");
            InviteInbox::new()
        }),
        None => InviteInbox::new(),
    })
}

/// Persist the invite inbox.
pub async fn save_inbox(store: &dyn KeyValueStore, inbox: &InviteInbox) -> Result<()> {
    let json = inbox.to_json().context("Failed to encode invite inbox")?;
    store
        .put(INBOX_KEY, &json)
        .await
        .context("Failed to save invite inbox")
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
