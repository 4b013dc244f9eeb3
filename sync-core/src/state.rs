//! Per-endpoint relay connection state machine.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the lifecycle of one relay connection. The state machine takes events as
//! input and produces a new state plus a list of actions to execute.
//!
//! The actual I/O (opening sockets, racing the connect timeout) is performed
//! by listsync-client, not by this module.

/// Relay connection state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// Never connected, or closed on request.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and usable for publish/query/subscribe.
    Connected,
    /// The last attempt failed, timed out, or the connection dropped.
    Failed {
        /// Why the endpoint is unusable.
        error: String,
    },
}

impl RelayState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller (the relay pool) is responsible
    /// for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Connection attempts start from any idle state
            (Self::Disconnected, Event::ConnectRequested)
            | (Self::Failed { .. }, Event::ConnectRequested) => {
                (Self::Connecting, vec![Action::Connect])
            }

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded) => {
                (Self::Connected, vec![Action::Emit(RelayEvent::Connected)])
            }
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Failed {
                    error: error.clone(),
                },
                vec![Action::Emit(RelayEvent::ConnectionFailed { error })],
            ),
            (Self::Connecting, Event::TimedOut) => {
                let error = "connection timed out".to_string();
                (
                    Self::Failed {
                        error: error.clone(),
                    },
                    vec![
                        Action::Disconnect,
                        Action::Emit(RelayEvent::ConnectionFailed { error }),
                    ],
                )
            }
            (Self::Connecting, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::Disconnect])
            }

            // From Connected
            (Self::Connected, Event::Closed { reason }) => (
                Self::Failed {
                    error: reason.clone(),
                },
                vec![Action::Emit(RelayEvent::Disconnected { reason })],
            ),
            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Disconnect,
                    Action::Emit(RelayEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // Shutdown of an endpoint that never came up
            (Self::Failed { .. }, Event::DisconnectRequested) => (Self::Disconnected, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the endpoint is usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the last attempt failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short lowercase label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed { .. } => "failed",
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in a relay connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The pool asked for a connection.
    ConnectRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The connect timeout elapsed first.
    TimedOut,
    /// The connection was lost after being established.
    Closed {
        /// Reason for disconnection.
        reason: String,
    },
    /// The pool is shutting down.
    DisconnectRequested,
}

/// Actions to be executed by the relay pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport (raced against the connect timeout).
    Connect,
    /// Close the transport.
    Disconnect,
    /// Report a lifecycle change.
    Emit(RelayEvent),
}

/// Lifecycle changes reported to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Endpoint became usable.
    Connected,
    /// Connection attempt failed or timed out.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Endpoint went away.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
}
