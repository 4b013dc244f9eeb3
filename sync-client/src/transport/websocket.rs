//! WebSocket transport: NIP-01 JSON text frames over tokio-tungstenite.
//!
//! The socket is split so the pool's reader task can block in `recv()`
//! while publishes and REQs go out through `send()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use listsync_types::{ClientMessage, RelayMessage};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close()` waits for a reader to let go of the read half.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One WebSocket connection to a relay.
#[derive(Default)]
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::ConnectionFailed(format!(
                "not a websocket url: {}",
                url
            )));
        }
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (sink, stream) = ws.split();

        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(%url, "WebSocket connected");
        Ok(())
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let frame = message
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(frame)).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn recv(&self) -> Result<RelayMessage, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let frame = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    break String::from_utf8(bytes)
                        .map_err(|e| TransportError::InvalidFrame(e.to_string()))
                }
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break Err(TransportError::ConnectionClosed),
                Some(Err(e)) => break Err(TransportError::ReceiveFailed(e.to_string())),
            }
        };

        match frame {
            Ok(text) => RelayMessage::from_json(&text)
                .map_err(|e| TransportError::InvalidFrame(e.to_string())),
            Err(e @ TransportError::InvalidFrame(_)) => Err(e),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                // The session is over; release the read half with it
                *guard = None;
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        // A reader blocked in recv() holds the read half until the relay
        // answers the close frame, then drops it itself.
        match tokio::time::timeout(CLOSE_GRACE, self.stream.lock()).await {
            Ok(mut stream) => {
                stream.take();
            }
            Err(_) => tracing::debug!("Reader still holds the socket after close"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_types::SubscriptionId;

    #[tokio::test]
    async fn starts_disconnected() {
        let transport = WebSocketTransport::new();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport
                .send(&ClientMessage::Close(SubscriptionId::from("x")))
                .await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn rejects_non_websocket_urls() {
        let transport = WebSocketTransport::new();
        let result = transport.connect("https://relay.example").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        // Bind then drop a listener so the port is very likely closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WebSocketTransport::new();
        let result = transport.connect(&format!("ws://127.0.0.1:{}", port)).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn close_without_connect_is_ok() {
        let transport = WebSocketTransport::new();
        transport.close().await.unwrap();
    }

    // =========================================================================
    // Local relay socket
    // =========================================================================

    /// Accept one WebSocket client on a loopback port. The returned receiver
    /// fires once the client side of the connection has gone away.
    async fn local_socket() -> (String, tokio::sync::oneshot::Receiver<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (gone_tx, gone_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            let _ = gone_tx.send(());
        });
        (url, gone_rx)
    }

    #[tokio::test]
    async fn close_releases_both_socket_halves() {
        let (url, gone) = local_socket().await;
        let transport = WebSocketTransport::new();
        transport.connect(&url).await.unwrap();
        assert!(transport.is_connected());

        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(transport.sink.lock().await.is_none());
        assert!(transport.stream.lock().await.is_none());
        tokio::time::timeout(Duration::from_secs(5), gone)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_reader_and_drops_its_half() {
        let (url, gone) = local_socket().await;
        let transport = std::sync::Arc::new(WebSocketTransport::new());
        transport.connect(&url).await.unwrap();

        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.recv().await })
        };
        // Let the reader take the stream lock
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(TransportError::ConnectionClosed | TransportError::ReceiveFailed(_))
        ));
        assert!(transport.stream.lock().await.is_none());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
        tokio::time::timeout(Duration::from_secs(5), gone)
            .await
            .unwrap()
            .unwrap();
    }
}
