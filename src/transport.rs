use std::io;
use std::time::Duration;

/// Connection state reported by transports that track it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
}

/// A persistent, message-oriented connection that carries one request
/// payload out and one response payload back per `send`.
///
/// The session only reads `is_connected` and awaits `connect` when it is
/// false. Sessions serialize their own connect attempts, but several sessions
/// may share a transport, so `connect` on an already connected transport must
/// return `Ok(())` without reconnecting.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the connection. A zero `timeout` means no limit.
    async fn connect(&self, timeout: Duration) -> io::Result<()>;

    /// Sends one payload and resolves with the matching response text.
    async fn send(&self, payload: String) -> io::Result<String>;

    /// Shuts the connection down. Pending sends fail.
    async fn close(&self);

    fn is_connected(&self) -> bool;
}
