//! Relay pool: one transport per endpoint, fanned out behind a single API.
//!
//! Each endpoint is driven by the [`RelayState`] machine from listsync-core;
//! the pool executes the actions it returns. Once connected, an endpoint gets
//! a reader task that routes incoming frames:
//! - `EVENT` to the subscription or query it belongs to
//! - `OK` to the publish waiting for it
//! - `EOSE` / `CLOSED` to finish a query
//!
//! Live subscriptions span every connected endpoint and deduplicate by event
//! id, so an event stored on three relays is delivered once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use listsync_core::{Action, Event as StateEvent, RelayEvent, RelayState, SeenEvents};
use listsync_types::{ClientMessage, Event, EventId, Filter, RelayMessage, SubscriptionId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{EndpointStatus, PoolError, RelayBackend};
use crate::subscription::{Subscription, SubscriptionHandle};
use crate::transport::{Transport, TransportError, WebSocketTransport};

/// Default for every pool timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Relay pool timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long one endpoint may take to connect.
    pub connect_timeout: Duration,
    /// How long to wait for an `OK` after publishing.
    pub publish_timeout: Duration,
    /// How long a query waits for every endpoint's `EOSE`.
    pub query_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            publish_timeout: DEFAULT_TIMEOUT,
            query_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the publish acknowledgement timeout.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

// ===========================================
// Routing
// ===========================================

enum QueryFrame {
    Event(Event),
    Done(String),
}

enum Route {
    Live {
        tx: mpsc::UnboundedSender<Event>,
        seen: SeenEvents,
        handle: SubscriptionHandle,
    },
    Query {
        tx: mpsc::UnboundedSender<QueryFrame>,
    },
}

type Routes = Arc<Mutex<HashMap<SubscriptionId, Route>>>;

fn route_event(routes: &Routes, subscription_id: &SubscriptionId, event: Event) {
    let mut routes = lock(routes);
    match routes.get_mut(subscription_id) {
        Some(Route::Live { tx, seen, .. }) => {
            if seen.insert(event.id) {
                let _ = tx.send(event);
            }
        }
        Some(Route::Query { tx }) => {
            let _ = tx.send(QueryFrame::Event(event));
        }
        None => tracing::trace!(sub = %subscription_id, "Event for closed subscription"),
    }
}

fn finish_query(routes: &Routes, subscription_id: &SubscriptionId, url: &str) {
    if let Some(Route::Query { tx }) = lock(routes).get(subscription_id) {
        let _ = tx.send(QueryFrame::Done(url.to_string()));
    }
}

fn finish_all_queries(routes: &Routes, url: &str) {
    for route in lock(routes).values() {
        if let Route::Query { tx } = route {
            let _ = tx.send(QueryFrame::Done(url.to_string()));
        }
    }
}

// ===========================================
// Endpoint
// ===========================================

struct Endpoint<T> {
    url: String,
    transport: Arc<T>,
    state: Mutex<RelayState>,
    pending_acks: Mutex<HashMap<EventId, oneshot::Sender<(bool, String)>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Endpoint<T> {
    fn new(url: String, transport: T) -> Self {
        Self {
            url,
            transport: Arc::new(transport),
            state: Mutex::new(RelayState::new()),
            pending_acks: Mutex::new(HashMap::new()),
            reader: Mutex::new(None),
        }
    }

    fn state(&self) -> RelayState {
        lock(&self.state).clone()
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).is_connected()
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            url: self.url.clone(),
            state: self.state(),
        }
    }

    fn transition(&self, event: StateEvent) -> Vec<Action> {
        let mut state = lock(&self.state);
        let (next, actions) = state.clone().on_event(event);
        *state = next;
        actions
    }

    async fn apply(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                // Connect is driven by connect() itself
                Action::Connect => {}
                Action::Disconnect => {
                    if let Err(e) = self.transport.close().await {
                        tracing::debug!(url = %self.url, error = %e, "Close failed");
                    }
                }
                Action::Emit(RelayEvent::Connected) => {
                    tracing::info!(url = %self.url, "Relay connected");
                }
                Action::Emit(RelayEvent::ConnectionFailed { error }) => {
                    tracing::warn!(url = %self.url, %error, "Relay connection failed");
                }
                Action::Emit(RelayEvent::Disconnected { reason }) => {
                    tracing::info!(url = %self.url, %reason, "Relay disconnected");
                }
            }
        }
    }

    async fn connect(self: &Arc<Self>, wait: Duration, routes: &Routes) {
        let actions = self.transition(StateEvent::ConnectRequested);
        if !actions.contains(&Action::Connect) {
            return;
        }
        tracing::debug!(url = %self.url, "Connecting to relay");

        let event = match timeout(wait, self.transport.connect(&self.url)).await {
            Ok(Ok(())) => StateEvent::ConnectSucceeded,
            Ok(Err(e)) => StateEvent::ConnectFailed {
                error: e.to_string(),
            },
            Err(_) => StateEvent::TimedOut,
        };
        let actions = self.transition(event);
        self.apply(actions).await;

        if self.is_connected() {
            self.spawn_reader(Arc::clone(routes));
        }
    }

    fn spawn_reader(self: &Arc<Self>, routes: Routes) {
        let endpoint = Arc::clone(self);
        let task = tokio::spawn(async move { endpoint.read_loop(routes).await });
        if let Some(old) = lock(&self.reader).replace(task) {
            old.abort();
        }
    }

    async fn read_loop(&self, routes: Routes) {
        loop {
            match self.transport.recv().await {
                Ok(message) => self.dispatch(message, &routes),
                Err(TransportError::InvalidFrame(reason)) => {
                    tracing::warn!(url = %self.url, %reason, "Skipping malformed frame");
                }
                Err(e) => {
                    let actions = self.transition(StateEvent::Closed {
                        reason: e.to_string(),
                    });
                    self.apply(actions).await;
                    // Dropping the senders fails every pending publish
                    lock(&self.pending_acks).clear();
                    finish_all_queries(&routes, &self.url);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, message: RelayMessage, routes: &Routes) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => route_event(routes, &subscription_id, *event),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if let Some(tx) = lock(&self.pending_acks).remove(&event_id) {
                    let _ = tx.send((accepted, message));
                }
            }
            RelayMessage::Eose(subscription_id) => {
                finish_query(routes, &subscription_id, &self.url);
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                tracing::debug!(url = %self.url, sub = %subscription_id, %message, "Relay closed subscription");
                finish_query(routes, &subscription_id, &self.url);
            }
            RelayMessage::Notice(notice) => {
                tracing::info!(url = %self.url, %notice, "Relay notice");
            }
        }
    }

    async fn publish(self: Arc<Self>, event: Event, wait: Duration) -> Result<EventId, String> {
        let id = event.id;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_acks).insert(id, tx);

        if let Err(e) = self.transport.send(&ClientMessage::Event(event)).await {
            lock(&self.pending_acks).remove(&id);
            return Err(format!("{}: {}", self.url, e));
        }

        match timeout(wait, rx).await {
            Ok(Ok((true, _))) => {
                tracing::debug!(url = %self.url, event = %id, "Relay accepted event");
                Ok(id)
            }
            Ok(Ok((false, message))) => Err(format!("{}: {}", self.url, message)),
            Ok(Err(_)) => Err(format!("{}: connection closed", self.url)),
            Err(_) => {
                lock(&self.pending_acks).remove(&id);
                Err(format!("{}: no acknowledgement", self.url))
            }
        }
    }

    async fn shutdown(&self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        lock(&self.pending_acks).clear();
        let actions = self.transition(StateEvent::DisconnectRequested);
        self.apply(actions).await;
        let _ = self.transport.close().await;
    }
}

// ===========================================
// RelayPool
// ===========================================

type Factory<T> = Arc<dyn Fn(&str) -> T + Send + Sync>;

/// Connections to a set of relay endpoints.
pub struct RelayPool<T> {
    factory: Factory<T>,
    config: PoolConfig,
    endpoints: Mutex<Vec<Arc<Endpoint<T>>>>,
    routes: Routes,
    shut_down: AtomicBool,
}

impl RelayPool<WebSocketTransport> {
    /// A pool that reaches relays over WebSocket.
    pub fn websocket(config: PoolConfig) -> Self {
        Self::new(|_| WebSocketTransport::new(), config)
    }
}

impl<T: Transport + 'static> RelayPool<T> {
    /// Create a pool that builds one transport per endpoint with `factory`.
    pub fn new(factory: impl Fn(&str) -> T + Send + Sync + 'static, config: PoolConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
            endpoints: Mutex::new(Vec::new()),
            routes: Arc::new(Mutex::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The pool's timeouts.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn connected_endpoints(&self) -> Vec<Arc<Endpoint<T>>> {
        lock(&self.endpoints)
            .iter()
            .filter(|ep| ep.is_connected())
            .cloned()
            .collect()
    }

    fn close_hook(
        &self,
        id: SubscriptionId,
        endpoints: Vec<Arc<Endpoint<T>>>,
    ) -> impl FnOnce() + Send + 'static {
        let routes = Arc::clone(&self.routes);
        move || {
            lock(&routes).remove(&id);
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            runtime.spawn(async move {
                let close = ClientMessage::Close(id);
                for endpoint in endpoints {
                    if endpoint.transport.is_connected() {
                        let _ = endpoint.transport.send(&close).await;
                    }
                }
            });
        }
    }
}

impl<T> std::fmt::Debug for RelayPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let urls: Vec<String> = lock(&self.endpoints).iter().map(|e| e.url.clone()).collect();
        f.debug_struct("RelayPool")
            .field("endpoints", &urls)
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl<T: Transport + 'static> RelayBackend for RelayPool<T> {
    async fn connect(&self, urls: &[String]) -> Vec<EndpointStatus> {
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::warn!("Connect requested after shutdown");
            return self.status();
        }

        let targets: Vec<Arc<Endpoint<T>>> = {
            let mut endpoints = lock(&self.endpoints);
            urls.iter()
                .map(|url| {
                    if let Some(existing) = endpoints.iter().find(|e| &e.url == url) {
                        return Arc::clone(existing);
                    }
                    let endpoint = Arc::new(Endpoint::new(url.clone(), (self.factory)(url)));
                    endpoints.push(Arc::clone(&endpoint));
                    endpoint
                })
                .collect()
        };

        join_all(
            targets
                .iter()
                .map(|ep| ep.connect(self.config.connect_timeout, &self.routes)),
        )
        .await;

        let statuses: Vec<EndpointStatus> = targets.iter().map(|ep| ep.status()).collect();
        let connected = statuses.iter().filter(|s| s.state.is_connected()).count();
        if connected == 0 {
            tracing::warn!(total = statuses.len(), "No relay reachable, running offline");
        } else {
            tracing::info!(connected, total = statuses.len(), "Relay pool ready");
        }
        statuses
    }

    fn is_connected(&self) -> bool {
        lock(&self.endpoints).iter().any(|ep| ep.is_connected())
    }

    fn status(&self) -> Vec<EndpointStatus> {
        lock(&self.endpoints).iter().map(|ep| ep.status()).collect()
    }

    async fn publish(&self, event: Event) -> Result<EventId, PoolError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        let endpoints = self.connected_endpoints();
        if endpoints.is_empty() {
            return Err(PoolError::Offline);
        }

        let mut attempts: FuturesUnordered<_> = endpoints
            .into_iter()
            .map(|ep| ep.publish(event.clone(), self.config.publish_timeout))
            .collect();

        let mut failures = Vec::new();
        while let Some(result) = attempts.next().await {
            match result {
                Ok(id) => {
                    if !attempts.is_empty() {
                        // Let the slower endpoints finish so their acks are consumed
                        tokio::spawn(async move { while attempts.next().await.is_some() {} });
                    }
                    return Ok(id);
                }
                Err(reason) => {
                    tracing::debug!(%reason, "Publish attempt failed");
                    failures.push(reason);
                }
            }
        }
        Err(PoolError::PublishRejected(failures.join("; ")))
    }

    async fn query(&self, filter: Filter) -> Vec<Event> {
        let endpoints = self.connected_endpoints();
        if endpoints.is_empty() {
            return Vec::new();
        }

        let id = SubscriptionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&self.routes).insert(id.clone(), Route::Query { tx });

        let req = ClientMessage::Req {
            subscription_id: id.clone(),
            filters: vec![filter],
        };
        let mut waiting = HashSet::new();
        for endpoint in &endpoints {
            match endpoint.transport.send(&req).await {
                Ok(()) => {
                    waiting.insert(endpoint.url.clone());
                }
                Err(e) => tracing::warn!(url = %endpoint.url, error = %e, "Query send failed"),
            }
        }

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let collect = async {
            while !waiting.is_empty() {
                match rx.recv().await {
                    Some(QueryFrame::Event(event)) => {
                        if seen.insert(event.id) {
                            events.push(event);
                        }
                    }
                    Some(QueryFrame::Done(url)) => {
                        waiting.remove(&url);
                    }
                    None => break,
                }
            }
        };
        if timeout(self.config.query_timeout, collect).await.is_err() {
            tracing::debug!(sub = %id, "Query timed out, returning partial results");
        }

        lock(&self.routes).remove(&id);
        let close = ClientMessage::Close(id);
        for endpoint in &endpoints {
            if endpoint.is_connected() {
                let _ = endpoint.transport.send(&close).await;
            }
        }
        events
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, PoolError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        let endpoints = self.connected_endpoints();
        if endpoints.is_empty() {
            return Err(PoolError::Offline);
        }

        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new(id.clone(), self.close_hook(id.clone(), endpoints.clone()));
        lock(&self.routes).insert(
            id.clone(),
            Route::Live {
                tx,
                seen: SeenEvents::new(),
                handle: handle.clone(),
            },
        );

        let req = ClientMessage::Req {
            subscription_id: id.clone(),
            filters: vec![filter],
        };
        let mut sent = 0;
        for endpoint in &endpoints {
            match endpoint.transport.send(&req).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(url = %endpoint.url, error = %e, "Subscribe send failed"),
            }
        }
        if sent == 0 {
            handle.close();
            return Err(PoolError::Offline);
        }

        tracing::debug!(sub = %id, relays = sent, "Subscription opened");
        Ok(Subscription::new(rx, handle))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        let route = lock(&self.routes).remove(id);
        if let Some(Route::Live { handle, .. }) = route {
            handle.close();
        }
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let routes: Vec<Route> = lock(&self.routes).drain().map(|(_, r)| r).collect();
        for route in routes {
            if let Route::Live { handle, .. } = route {
                handle.close();
            }
        }
        let endpoints: Vec<Arc<Endpoint<T>>> = lock(&self.endpoints).clone();
        for endpoint in endpoints {
            endpoint.shutdown().await;
        }
        tracing::info!("Relay pool shut down");
    }
}
