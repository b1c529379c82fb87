use crate::correlation::PendingResponses;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::Message as WsMessage},
};
use wsrpc::{Transport, TransportState};

type StateChangeHandler = Box<dyn Fn(TransportState) + Send + Sync>;

/// State shared between the transport handle and its background tasks.
struct SharedState {
    is_connected: AtomicBool,
    pending: Mutex<PendingResponses>,
    state_change_handler: Mutex<Option<StateChangeHandler>>,
}

impl SharedState {
    fn pending(&self) -> MutexGuard<'_, PendingResponses> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, text: String) {
        if !self.pending().resolve(text) {
            tracing::debug!("dropping inbound message with no waiting request");
        }
    }

    fn mark_connected(&self) {
        if !self.is_connected.swap(true, Ordering::SeqCst) {
            self.notify(TransportState::Connected);
        }
    }

    /// Fails every waiting request. Notifies only on an actual transition.
    fn mark_disconnected(&self) {
        let was_connected = self.is_connected.swap(false, Ordering::SeqCst);
        self.pending().fail_all();
        if was_connected {
            self.notify(TransportState::Disconnected);
        }
    }

    fn notify(&self, state: TransportState) {
        let handler = self
            .state_change_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handler.as_ref() {
            handler(state);
        }
    }
}

struct Connection {
    tx: mpsc::UnboundedSender<WsMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A [`Transport`] over a single WebSocket connection.
///
/// Requests are written as text frames. Responses are routed back to their
/// `send` by request id, so many calls can be in flight at once and a node
/// may answer them in any order.
pub struct WsTransport {
    url: String,
    shared: Arc<SharedState>,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl WsTransport {
    /// Creates a disconnected transport. Nothing happens on the network until
    /// `connect` (or a session's first send).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shared: Arc::new(SharedState {
                is_connected: AtomicBool::new(false),
                pending: Mutex::new(PendingResponses::default()),
                state_change_handler: Mutex::new(None),
            }),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    /// Targets the `/ws` route of a `wsrpc-tokio-server` style endpoint.
    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self::new(format!("ws://{host}:{port}/ws"))
    }

    /// Creates a transport and connects it right away.
    pub async fn connect_to(url: impl Into<String>, timeout: Duration) -> io::Result<Self> {
        let transport = Self::new(url);
        transport.connect(timeout).await?;
        Ok(transport)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of sends still waiting for a response.
    pub fn pending_len(&self) -> usize {
        self.shared.pending().len()
    }

    /// Registers a callback for connection state transitions.
    ///
    /// If the transport is already connected the handler is invoked with
    /// `Connected` immediately.
    pub fn set_state_change_handler<F>(&self, handler: F)
    where
        F: Fn(TransportState) + Send + Sync + 'static,
    {
        let handler: StateChangeHandler = Box::new(handler);
        if self.is_connected() {
            handler(TransportState::Connected);
        }
        *self
            .shared
            .state_change_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn spawn_tasks(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Connection {
        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        // Send loop
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let is_close = matches!(message, WsMessage::Close(_));
                if let Err(err) = sink.send(message).await {
                    tracing::warn!(%err, "websocket write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        // Receive loop
        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => shared.deliver(text.as_str().to_owned()),
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => shared.deliver(text),
                        Err(_) => {
                            tracing::warn!(len = bytes.len(), "ignoring non-UTF-8 binary message")
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        tracing::info!(?frame, "server closed the connection");
                        break;
                    }
                    // Pings are answered by tungstenite itself.
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "websocket read failed");
                        break;
                    }
                }
            }
            shared.mark_disconnected();
        });

        Connection { tx, reader, writer }
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, timeout: Duration) -> io::Result<()> {
        let mut connection = self.connection.lock().await;

        if connection.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = connection.take() {
            stale.reader.abort();
            stale.writer.abort();
        }

        let connecting = connect_async(self.url.as_str());
        let handshake = if timeout.is_zero() {
            connecting.await
        } else {
            tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("timed out connecting to {} after {:?}", self.url, timeout),
                    )
                })?
        };
        let (ws_stream, _) = handshake.map_err(ws_error_to_io)?;

        // Flip the flag before the reader exists so an immediate disconnect
        // is always observed as a transition.
        self.shared.mark_connected();
        *connection = Some(self.spawn_tasks(ws_stream));

        tracing::info!(url = %self.url, "websocket transport connected");
        Ok(())
    }

    async fn send(&self, payload: String) -> io::Result<String> {
        let tx = match self.connection.lock().await.as_ref() {
            Some(connection) if self.is_connected() => connection.tx.clone(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "websocket transport is not connected",
                ));
            }
        };

        let response = self.shared.pending().register_request(&payload);

        // The reader may have shut down between the check above and the
        // registration; its cleanup would then have missed this request.
        if !self.is_connected() {
            self.shared.pending().fail_all();
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "websocket transport disconnected",
            ));
        }

        tx.send(WsMessage::text(payload)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "websocket writer has shut down")
        })?;

        response.await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed before a response arrived",
            )
        })
    }

    async fn close(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };

        // The writer exits after the close frame goes out.
        let _ = connection.tx.send(WsMessage::Close(None));
        connection.reader.abort();
        self.shared.mark_disconnected();

        tracing::info!(url = %self.url, "websocket transport closed");
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.reader.abort();
            connection.writer.abort();
        }
        self.shared.mark_disconnected();
    }
}

fn ws_error_to_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(err) => err,
        other => io::Error::other(other),
    }
}
