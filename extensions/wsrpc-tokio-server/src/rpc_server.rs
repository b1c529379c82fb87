//! Note: This `RpcServer` is a test and demo node. It speaks enough JSON-RPC
//! 2.0 over WebSockets to exercise `wsrpc` sessions end to end (single calls,
//! batches, notifications and the standard error objects) and has no
//! authentication or authorization of any kind.

use axum::{
    Router,
    extract::ConnectInfo,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use futures_util::future::join_all;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    sync::{RwLock, mpsc},
    time::timeout,
};
use wsrpc::RpcError;
use wsrpc::constants::{INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR};

/// The interval at which the server sends Ping messages to the client.
const HEARTBEAT_INTERVAL: u64 = 5;

/// The maximum time to wait for a message from the client (including Pong)
/// before considering the connection timed out.
const CLIENT_TIMEOUT: u64 = 15;

/// Handles one method. Receives the request's `params` (`null` when absent).
pub type RpcMethodHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>> + Send + Sync,
>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RpcServerError {
    #[error("a handler for method `{0}` is already registered")]
    MethodAlreadyRegistered(String),
}

/// A JSON-RPC server that listens for WebSocket connections on `/ws`.
#[derive(Default)]
pub struct RpcServer {
    handlers: RwLock<HashMap<String, RpcMethodHandler>>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `method`. Each name can be registered once.
    pub async fn register_method<F, Fut>(
        &self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), RpcServerError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        match self.handlers.write().await.entry(method.into()) {
            Entry::Occupied(entry) => Err(RpcServerError::MethodAlreadyRegistered(
                entry.key().clone(),
            )),
            Entry::Vacant(entry) => {
                let wrapped = move |params: Value| {
                    Box::pin(handler(params))
                        as Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>
                };
                entry.insert(Arc::new(wrapped));
                Ok(())
            }
        }
    }

    /// Binds to an address and starts the RPC server.
    pub async fn serve<A: ToSocketAddrs>(self, addr: A) -> Result<SocketAddr, axum::BoxError> {
        let listener = TcpListener::bind(addr).await?;
        Arc::new(self).serve_with_listener(listener).await
    }

    /// Starts the RPC server on a specific host and port.
    pub async fn serve_on(self, host: &str, port: u16) -> Result<SocketAddr, axum::BoxError> {
        self.serve(format!("{host}:{port}")).await
    }

    /// Starts the RPC server with a pre-bound `TcpListener`.
    ///
    /// Binding to port 0 first and reading the address back is how tests get
    /// a free port.
    pub async fn serve_with_listener(
        self: Arc<Self>,
        listener: TcpListener,
    ) -> Result<SocketAddr, axum::BoxError> {
        let address = listener.local_addr()?;
        let app = Router::new().route(
            "/ws",
            get({
                let server = self.clone();
                move |ws, conn| Self::ws_handler(ws, conn, server)
            }),
        );
        tracing::info!("Server running on {:?}", address);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(address)
    }

    /// Answers one inbound text message.
    ///
    /// Returns `None` when nothing should be written back: a notification,
    /// or a batch made only of notifications.
    pub async fn handle_message(&self, text: &str) -> Option<String> {
        let request = match serde_json::from_str::<Value>(text) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(%err, "unparseable request");
                return Some(error_response(Value::Null, PARSE_ERROR, "Parse error").to_string());
            }
        };

        match request {
            Value::Array(calls) if calls.is_empty() => {
                Some(error_response(Value::Null, INVALID_REQUEST, "Invalid Request").to_string())
            }
            Value::Array(calls) => {
                let responses: Vec<Value> =
                    join_all(calls.into_iter().map(|call| self.handle_call(call)))
                        .await
                        .into_iter()
                        .flatten()
                        .collect();

                (!responses.is_empty()).then(|| Value::Array(responses).to_string())
            }
            call => self
                .handle_call(call)
                .await
                .map(|response| response.to_string()),
        }
    }

    async fn handle_call(&self, call: Value) -> Option<Value> {
        let Value::Object(mut call) = call else {
            return Some(error_response(Value::Null, INVALID_REQUEST, "Invalid Request"));
        };

        // Only a 2.0 request without an `id` member is a notification. Older
        // style requests without one are answered with a `null` id.
        let is_v2 = call.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION);
        let id = match call.remove("id") {
            None if !is_v2 => Some(Value::Null),
            id => id,
        };
        let method = match call.remove("method") {
            Some(Value::String(method)) => method,
            _ => {
                return Some(error_response(
                    id.unwrap_or(Value::Null),
                    INVALID_REQUEST,
                    "Invalid Request",
                ));
            }
        };
        let params = call.remove("params").unwrap_or(Value::Null);

        let handler = self.handlers.read().await.get(&method).cloned();
        let outcome = match handler {
            Some(handler) => handler(params).await,
            None => Err(RpcError::new("Method not found", METHOD_NOT_FOUND)),
        };

        let Some(id) = id else {
            if let Err(err) = outcome {
                tracing::debug!(%method, %err, "notification failed");
            }
            return None;
        };

        Some(match outcome {
            Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "result": result, "id": id}),
            Err(err) => json!({"jsonrpc": JSONRPC_VERSION, "error": err, "id": id}),
        })
    }

    async fn ws_handler(
        ws: WebSocketUpgrade,
        ConnectInfo(addr): ConnectInfo<SocketAddr>,
        server: Arc<RpcServer>,
    ) -> impl IntoResponse {
        tracing::info!("Client connected: {}", addr);
        ws.on_upgrade(move |socket| server.handle_socket(socket, addr))
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, addr: SocketAddr) {
        let (sender, receiver) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(Self::sender_task(sender, rx));
        tokio::spawn(self.receiver_task(receiver, tx, addr));
    }

    /// Forwards responses and pings to the client.
    async fn sender_task(
        mut sender: SplitSink<WebSocket, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break; // Exit if the client has disconnected.
            }
        }
    }

    /// Reads requests, pings the client and drops it when it goes quiet.
    ///
    /// Every request is answered on its own task, so a slow method never
    /// holds up the ones behind it and responses may go out of order.
    async fn receiver_task(
        self: Arc<Self>,
        mut receiver: SplitStream<WebSocket>,
        tx: mpsc::UnboundedSender<Message>,
        addr: SocketAddr,
    ) {
        let heartbeat_interval = Duration::from_secs(HEARTBEAT_INTERVAL);
        let client_timeout = Duration::from_secs(CLIENT_TIMEOUT);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(heartbeat_interval) => {
                    if tx.send(Message::Ping(Vec::new().into())).is_err() {
                        tracing::info!("Client {} disconnected (failed to send ping).", addr);
                        break;
                    }
                }

                result = timeout(client_timeout, receiver.next()) => {
                    match result {
                        Err(_) => {
                            tracing::warn!("Client {} timed out. Closing connection.", addr);
                            break;
                        },
                        Ok(Some(Ok(msg))) => {
                            let text = match msg {
                                Message::Text(text) => text.as_str().to_owned(),
                                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                                    Ok(text) => text,
                                    Err(_) => {
                                        tracing::warn!("Ignoring non-UTF-8 binary message from {}", addr);
                                        continue;
                                    }
                                },
                                Message::Pong(_) => {
                                    tracing::trace!("Received pong from {}", addr);
                                    continue;
                                }
                                Message::Close(_) => {
                                    tracing::info!("Client {} initiated close.", addr);
                                    break;
                                }
                                Message::Ping(_) => continue,
                            };

                            let server = self.clone();
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                if let Some(response) = server.handle_message(&text).await {
                                    let _ = tx.send(Message::Text(response.into()));
                                }
                            });
                        }
                        Ok(None) | Ok(Some(Err(_))) => {
                            tracing::info!("Client {} disconnected.", addr);
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("Terminated connection for {}.", addr);
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "error": RpcError::new(message, code),
        "id": id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn server() -> RpcServer {
        let server = RpcServer::new();
        server
            .register_method("echo", |params| async move { Ok(params) })
            .await
            .unwrap();
        server
            .register_method("fail", |_| async move {
                Err(RpcError::new("Error: execution reverted", -32000))
            })
            .await
            .unwrap();
        server
    }

    async fn answer(server: &RpcServer, text: &str) -> Option<Value> {
        server
            .handle_message(text)
            .await
            .map(|response| serde_json::from_str(&response).unwrap())
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let server = server().await;
        let result = server
            .register_method("echo", |params| async move { Ok(params) })
            .await;
        assert_eq!(
            result,
            Err(RpcServerError::MethodAlreadyRegistered("echo".into()))
        );
    }

    #[tokio::test]
    async fn answers_single_calls() {
        let server = server().await;
        assert_eq!(
            answer(&server, r#"{"jsonrpc":"2.0","method":"echo","params":[1],"id":7}"#).await,
            Some(json!({"jsonrpc": "2.0", "result": [1], "id": 7}))
        );
        assert_eq!(
            answer(&server, r#"{"jsonrpc":"2.0","method":"fail","id":"a"}"#).await,
            Some(json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Error: execution reverted"},
                "id": "a"
            }))
        );
    }

    #[tokio::test]
    async fn reports_standard_errors() {
        let server = server().await;

        let parse = answer(&server, "{not json").await.unwrap();
        assert_eq!(parse["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(parse["id"], Value::Null);

        let empty = answer(&server, "[]").await.unwrap();
        assert_eq!(empty["error"]["code"], json!(INVALID_REQUEST));

        let no_method = answer(&server, r#"{"jsonrpc":"2.0","id":1}"#).await.unwrap();
        assert_eq!(no_method["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(no_method["id"], json!(1));

        let unknown = answer(&server, r#"{"jsonrpc":"2.0","method":"nope","id":2}"#)
            .await
            .unwrap();
        assert_eq!(unknown["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = server().await;
        assert_eq!(
            answer(&server, r#"{"jsonrpc":"2.0","method":"echo","params":[]}"#).await,
            None
        );
        assert_eq!(
            answer(&server, r#"[{"jsonrpc":"2.0","method":"echo"}]"#).await,
            None
        );
    }

    #[tokio::test]
    async fn requests_without_version_or_id_are_answered() {
        let server = server().await;
        assert_eq!(
            answer(&server, r#"{"method":"echo","params":[1]}"#).await,
            Some(json!({"jsonrpc": "2.0", "result": [1], "id": null}))
        );

        let response = answer(&server, r#"[{"method":"echo","params":"a"},{"method":"fail"}]"#)
            .await
            .unwrap();
        let responses = response.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"], json!("a"));
        assert_eq!(responses[1]["error"]["code"], json!(-32000));
    }

    #[tokio::test]
    async fn batches_skip_notifications_and_keep_order() {
        let server = server().await;
        let response = answer(
            &server,
            r#"[
                {"jsonrpc":"2.0","method":"echo","params":"a","id":1},
                {"jsonrpc":"2.0","method":"echo","params":"ignored"},
                {"jsonrpc":"2.0","method":"fail","id":2},
                5
            ]"#,
        )
        .await
        .unwrap();

        let responses = response.as_array().unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], json!({"jsonrpc": "2.0", "result": "a", "id": 1}));
        assert_eq!(responses[1]["error"]["code"], json!(-32000));
        assert_eq!(responses[2]["error"]["code"], json!(INVALID_REQUEST));
    }
}
