//! # listsync-client
//!
//! Client library for syncing grocery lists through Nostr-style relays.
//!
//! This is the main library that applications use to sync lists.
//!
//! ## Features
//!
//! - **Signed events**: every list version is a BIP-340 Schnorr-signed
//!   replaceable event; unsigned or tampered events are dropped
//! - **Relay pool**: publishes to every connected relay, deduplicates what
//!   comes back, and degrades to offline mode when nothing is reachable
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock)
//! - **Pure State Machine**: Uses listsync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use listsync_client::{
//!     EngineConfig, FileStore, IdentityStore, PoolConfig, RelayPool, SyncEngine,
//! };
//!
//! let store = Arc::new(FileStore::new(data_dir));
//! let keys = IdentityStore::new(store.clone()).get_or_create().await?;
//! let pool = Arc::new(RelayPool::websocket(PoolConfig::default()));
//! let engine = SyncEngine::open(pool, keys, store, EngineConfig::default()).await?;
//! engine.connect(&["wss://relay.damus.io".into()]).await;
//!
//! let id = engine.create_list("Weekly shop", vec![]).await?;
//! engine.share_list(&id, "Weekly shop", "npub1...").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod codec;
pub mod crypto;
pub mod engine;
pub mod identity;
mod invite;
pub mod store;
pub mod subscription;
pub mod transport;

pub use backend::{
    EndpointStatus, LocalBackend, PoolConfig, PoolError, RelayBackend, RelayPool,
};
pub use codec::DecodeError;
pub use crypto::CryptoError;
pub use engine::{
    EngineConfig, EngineError, Feed, InviteFeed, ListFeed, OwnedLists, OwnedListsFeed, SyncEngine,
};
pub use identity::{IdentityError, IdentityStore, Keys};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use subscription::{Subscription, SubscriptionHandle};
pub use transport::{MockNetwork, MockTransport, Transport, TransportError, WebSocketTransport};
