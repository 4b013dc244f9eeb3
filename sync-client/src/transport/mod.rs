//! Transport abstraction for listsync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the connection to one relay endpoint (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection to a relay URL
//! - `send()` transmits one client frame
//! - `recv()` receives one relay frame
//! - `close()` gracefully terminates
//!
//! `send()` and `recv()` may be called concurrently: the relay pool runs a
//! reader task per endpoint while publishes and subscriptions send.
//!
//! # Example
//!
//! ```ignore
//! let network = MockNetwork::new();
//! network.add_relay("wss://relay.test");
//! let transport = network.transport();
//! transport.connect("wss://relay.test").await?;
//! transport.send(&ClientMessage::Event(event)).await?;
//! let ack = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::{MockNetwork, MockRelay, MockTransport};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use listsync_types::{ClientMessage, RelayMessage};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame arrived that is not a valid relay message.
    ///
    /// The connection is still usable; callers skip the frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging relay protocol frames.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, in-memory mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at `url`.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Receive one frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<RelayMessage, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
