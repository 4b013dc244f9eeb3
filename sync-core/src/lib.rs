//! # listsync-core
//!
//! Pure logic for listsync (no I/O, instant tests).
//!
//! This crate implements the relay connection state machine, the list
//! cache and its last-write-wins merge, delivery deduplication and the
//! invite inbox, without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions and merge results
//!
//! The actual I/O (relays, disk) is performed by `listsync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod dedupe;
pub mod inbox;
pub mod merge;
pub mod state;

pub use cache::ListCache;
pub use dedupe::{SeenEvents, DEFAULT_SEEN_CAPACITY};
pub use inbox::InviteInbox;
pub use merge::{merge, supersedes, MergeOutcome};
pub use state::{Action, Event, RelayEvent, RelayState};
