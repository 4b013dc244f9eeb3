//! Mock transport for testing.
//!
//! [`MockNetwork`] maps relay URLs to in-memory [`MockRelay`]s. A relay
//! stores published events, answers REQ with stored matches plus EOSE, and
//! fans new events out to every open subscription, like a real relay.
//! Knobs on the relay force connection failures, hangs and rejections;
//! [`MockTransport`] captures sent frames for verification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use listsync_types::{ClientMessage, Event, EventId, Filter, RelayMessage, SubscriptionId};
use tokio::sync::mpsc;

use super::{Transport, TransportError};
use crate::backend::store_replaceable;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ===========================================
// MockNetwork
// ===========================================

/// A set of reachable relays, keyed by URL. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    relays: Arc<Mutex<HashMap<String, MockRelay>>>,
}

impl MockNetwork {
    /// Create a network with no relays.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a relay reachable at `url` (or return the existing one).
    pub fn add_relay(&self, url: &str) -> MockRelay {
        lock(&self.relays)
            .entry(url.to_string())
            .or_default()
            .clone()
    }

    /// The relay at `url`, if reachable.
    pub fn relay(&self, url: &str) -> Option<MockRelay> {
        lock(&self.relays).get(url).cloned()
    }

    /// Make `url` unreachable. Open connections are dropped.
    pub fn remove_relay(&self, url: &str) {
        if let Some(relay) = lock(&self.relays).remove(url) {
            relay.drop_connections();
        }
    }

    /// A fresh, unconnected transport on this network.
    pub fn transport(&self) -> MockTransport {
        MockTransport::new(self.clone())
    }
}

// ===========================================
// MockRelay
// ===========================================

/// In-memory relay. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    inner: Arc<Mutex<RelayInner>>,
}

#[derive(Debug, Default)]
struct RelayInner {
    events: Vec<Event>,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    received: Vec<ClientMessage>,
    refuse_connections: Option<String>,
    fail_next_connect: Option<String>,
    hang_connects: bool,
    reject_publishes: Option<String>,
    ignore_publishes: bool,
}

#[derive(Debug)]
struct Connection {
    tx: mpsc::UnboundedSender<RelayMessage>,
    subscriptions: HashMap<SubscriptionId, Vec<Filter>>,
}

impl MockRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.inner).events.clone()
    }

    /// Every frame received from clients.
    pub fn received(&self) -> Vec<ClientMessage> {
        lock(&self.inner).received.clone()
    }

    /// Events clients tried to publish, accepted or not.
    pub fn published(&self) -> Vec<Event> {
        lock(&self.inner)
            .received
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Event(ev) => Some(ev.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.inner).connections.len()
    }

    /// Number of open subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner)
            .connections
            .values()
            .map(|c| c.subscriptions.len())
            .sum()
    }

    /// Refuse every connection attempt with `reason`.
    pub fn refuse_connections(&self, reason: &str) {
        lock(&self.inner).refuse_connections = Some(reason.to_string());
    }

    /// Cause the next connection attempt to fail with `error`.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Make connection attempts never complete.
    pub fn hang_connects(&self) {
        lock(&self.inner).hang_connects = true;
    }

    /// Answer every publish with `OK false` and `message`.
    pub fn reject_publishes(&self, message: &str) {
        lock(&self.inner).reject_publishes = Some(message.to_string());
    }

    /// Swallow publishes without ever answering.
    pub fn ignore_publishes(&self) {
        lock(&self.inner).ignore_publishes = true;
    }

    /// Store an event without notifying anyone (pre-existing history).
    pub fn store(&self, event: Event) {
        store_replaceable(&mut lock(&self.inner).events, event);
    }

    /// Store an event and fan it out, as if another client published it.
    pub fn inject(&self, event: Event) {
        let mut inner = lock(&self.inner);
        if store_replaceable(&mut inner.events, event.clone()) {
            fan_out(&inner, &event);
        }
    }

    /// Fan an event out to matching subscriptions without storing it.
    ///
    /// Delivering the same event twice simulates duplicate delivery.
    pub fn deliver(&self, event: &Event) {
        fan_out(&lock(&self.inner), event);
    }

    /// Drop every client connection.
    pub fn drop_connections(&self) {
        lock(&self.inner).connections.clear();
    }

    fn hangs(&self) -> bool {
        lock(&self.inner).hang_connects
    }

    fn open(&self) -> Result<(u64, mpsc::UnboundedReceiver<RelayMessage>), String> {
        let mut inner = lock(&self.inner);
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(error);
        }
        if let Some(reason) = &inner.refuse_connections {
            return Err(reason.clone());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = inner.next_connection;
        inner.next_connection += 1;
        inner.connections.insert(
            id,
            Connection {
                tx,
                subscriptions: HashMap::new(),
            },
        );
        Ok((id, rx))
    }

    fn close_connection(&self, id: u64) {
        lock(&self.inner).connections.remove(&id);
    }

    fn handle(&self, connection: u64, message: ClientMessage) {
        let mut inner = lock(&self.inner);
        inner.received.push(message.clone());

        match message {
            ClientMessage::Event(event) => {
                if inner.ignore_publishes {
                    return;
                }
                let rejection = inner.reject_publishes.clone();
                let (accepted, reply) = match rejection {
                    Some(reason) => (false, reason),
                    None => {
                        if store_replaceable(&mut inner.events, event.clone()) {
                            fan_out(&inner, &event);
                            (true, String::new())
                        } else {
                            (true, "duplicate: already have this event".to_string())
                        }
                    }
                };
                send_to(
                    &inner,
                    connection,
                    RelayMessage::Ok {
                        event_id: event.id,
                        accepted,
                        message: reply,
                    },
                );
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let stored = stored_matches(&inner.events, &filters);
                if let Some(conn) = inner.connections.get_mut(&connection) {
                    conn.subscriptions
                        .insert(subscription_id.clone(), filters);
                }
                for event in stored {
                    send_to(
                        &inner,
                        connection,
                        RelayMessage::Event {
                            subscription_id: subscription_id.clone(),
                            event: Box::new(event),
                        },
                    );
                }
                send_to(&inner, connection, RelayMessage::Eose(subscription_id));
            }
            ClientMessage::Close(subscription_id) => {
                if let Some(conn) = inner.connections.get_mut(&connection) {
                    conn.subscriptions.remove(&subscription_id);
                }
            }
        }
    }
}

fn stored_matches(events: &[Event], filters: &[Filter]) -> Vec<Event> {
    let mut ids: Vec<EventId> = Vec::new();
    let mut out = Vec::new();
    for filter in filters {
        let mut matching: Vec<&Event> = events.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        for event in matching {
            if !ids.contains(&event.id) {
                ids.push(event.id);
                out.push(event.clone());
            }
        }
    }
    out
}

fn fan_out(inner: &RelayInner, event: &Event) {
    for conn in inner.connections.values() {
        for (subscription_id, filters) in &conn.subscriptions {
            if filters.iter().any(|f| f.matches(event)) {
                let _ = conn.tx.send(RelayMessage::Event {
                    subscription_id: subscription_id.clone(),
                    event: Box::new(event.clone()),
                });
            }
        }
    }
}

fn send_to(inner: &RelayInner, connection: u64, message: RelayMessage) {
    if let Some(conn) = inner.connections.get(&connection) {
        let _ = conn.tx.send(message);
    }
}

// ===========================================
// MockTransport
// ===========================================

/// Mock transport for testing.
///
/// Connects to relays on a [`MockNetwork`] and records every frame sent.
/// Clones share state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    network: MockNetwork,
    inner: Arc<Mutex<MockTransportInner>>,
    inbox: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<RelayMessage>>>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    link: Option<(MockRelay, u64)>,
    connected_address: Option<String>,
    sent_messages: Vec<ClientMessage>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a transport on `network`.
    pub fn new(network: MockNetwork) -> Self {
        Self {
            network,
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            inbox: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Get all frames that were sent.
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        lock(&self.inner).sent_messages.clone()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<ClientMessage> {
        lock(&self.inner).sent_messages.last().cloned()
    }

    /// Get the URL that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        lock(&self.inner).connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        lock(&self.inner).fail_next_send = Some(error.to_string());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        if let Some(error) = lock(&self.inner).fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        let relay = self
            .network
            .relay(url)
            .ok_or_else(|| TransportError::ConnectionFailed(format!("{} unreachable", url)))?;
        if relay.hangs() {
            std::future::pending::<()>().await;
        }
        let (id, rx) = relay.open().map_err(TransportError::ConnectionFailed)?;

        *self.inbox.lock().await = Some(rx);
        let mut inner = lock(&self.inner);
        inner.link = Some((relay, id));
        inner.connected_address = Some(url.to_string());
        Ok(())
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let (relay, id) = {
            let mut inner = lock(&self.inner);
            let (relay, id) = inner.link.clone().ok_or(TransportError::NotConnected)?;
            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }
            inner.sent_messages.push(message.clone());
            (relay, id)
        };
        relay.handle(id, message.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<RelayMessage, TransportError> {
        let mut inbox = self.inbox.lock().await;
        let rx = inbox.as_mut().ok_or(TransportError::NotConnected)?;
        match rx.recv().await {
            Some(message) => Ok(message),
            None => {
                lock(&self.inner).link = None;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).link.is_some()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some((relay, id)) = lock(&self.inner).link.take() {
            relay.close_connection(id);
        }
        Ok(())
    }
}
