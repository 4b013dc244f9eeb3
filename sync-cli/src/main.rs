//! # listsync
//!
//! Command-line client for shared grocery lists synced over Nostr relays.
//!
//! ## Commands
//!
//! - `init`: Create the signing identity
//! - `create`, `add`, `remove`: Edit lists
//! - `lists`, `show`: Display lists, optionally following changes
//! - `share`, `invites`, `accept`, `decline`: Share lists between keys
//! - `status`: Show identity, relays and cache
//!
//! ## Example
//!
//! ```bash
//! listsync init
//! listsync create "Weekly shop" --item Milk:1:gallon:dairy --item Eggs:12
//! listsync share list_... npub1...
//!
//! # On the other device
//! listsync invites --wait 10
//! listsync accept list_...
//! listsync show list_... --watch
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{init, invites, lists, share, status};

/// Shared grocery lists over Nostr relays.
#[derive(Parser, Debug)]
#[command(name = "listsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the identity, configuration and cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the signing identity
    Init,

    /// Create a new list
    Create {
        /// List name
        name: String,

        /// Item as name[:qty[:unit[:aisle]]], repeatable
        #[arg(long = "item", short)]
        items: Vec<String>,
    },

    /// Add an item, or replace the item with the same name
    Add {
        /// List id
        list_id: String,

        /// Item as name[:qty[:unit[:aisle]]]
        item: String,
    },

    /// Remove an item by name
    Remove {
        /// List id
        list_id: String,

        /// Item name
        item: String,
    },

    /// Show your lists and lists shared with you
    Lists {
        /// Keep running and print changes
        #[arg(long)]
        watch: bool,
    },

    /// Show one list
    Show {
        /// List id
        list_id: String,

        /// Keep running and print changes
        #[arg(long)]
        watch: bool,
    },

    /// Invite another key to a list
    Share {
        /// List id
        list_id: String,

        /// Recipient public key (npub, hex, or nostr: URI)
        recipient: String,
    },

    /// Check for new invites and list pending ones
    Invites {
        /// Seconds to listen for new invites
        #[arg(long, default_value = "3")]
        wait: u64,
    },

    /// Accept a pending invite
    Accept {
        /// List id from the invite
        list_id: String,
    },

    /// Decline a pending invite
    Decline {
        /// List id from the invite
        list_id: String,
    },

    /// Show identity, relay and cache status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("listsync=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    match cli.command {
        Commands::Init => init::run(&data_dir).await?,
        Commands::Create { name, items } => {
            lists::create(&data_dir, &name, &items).await?;
        }
        Commands::Add { list_id, item } => {
            lists::add(&data_dir, &list_id, &item).await?;
        }
        Commands::Remove { list_id, item } => {
            lists::remove(&data_dir, &list_id, &item).await?;
        }
        Commands::Lists { watch } => {
            lists::owned(&data_dir, watch).await?;
        }
        Commands::Show { list_id, watch } => {
            lists::show(&data_dir, &list_id, watch).await?;
        }
        Commands::Share { list_id, recipient } => {
            share::run(&data_dir, &list_id, &recipient).await?;
        }
        Commands::Invites { wait } => {
            invites::list(&data_dir, Duration::from_secs(wait)).await?;
        }
        Commands::Accept { list_id } => {
            invites::accept(&data_dir, &list_id).await?;
        }
        Commands::Decline { list_id } => invites::decline(&data_dir, &list_id).await?,
        Commands::Status => {
            status::run(&data_dir).await?;
        }
    }

    Ok(())
}

/// Default data directory for listsync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "listsync", "listsync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
