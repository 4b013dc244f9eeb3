//! # listsync-types
//!
//! Wire format types for the listsync grocery list protocol.
//!
//! This crate provides the foundational types used across all listsync crates:
//! - [`PublicKey`], [`EventId`], [`ListId`], [`SubscriptionId`] - Identity and addressing types
//! - [`Event`], [`UnsignedEvent`], [`Kind`], [`Tag`] - Signed relay events
//! - [`Filter`] - Subscription filters
//! - [`GroceryList`], [`Item`], [`ListInvite`] - Event payloads
//! - [`ClientMessage`], [`RelayMessage`] - Relay protocol frames
//! - [`ProtocolError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub mod event;
mod filter;
mod ids;
mod list;
mod messages;

pub use error::ProtocolError;
pub use event::{Event, Kind, Tag, UnsignedEvent};
pub use filter::Filter;
pub use ids::{EventId, ListId, PublicKey, SubscriptionId, NOSTR_URI_PREFIX};
pub use list::{GroceryList, Item, ListInvite};
pub use messages::{ClientMessage, RelayMessage};
