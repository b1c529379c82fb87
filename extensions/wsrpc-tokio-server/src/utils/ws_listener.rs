use std::io::Result;
use tokio::net::TcpListener;

/// Binds a `TcpListener` to a free port on `127.0.0.1` and returns it with
/// the WebSocket URL a client should dial once the server is running on it.
pub async fn bind_ws_listener_on_random_port() -> Result<(TcpListener, String)> {
    // Port 0 lets the OS pick.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = listener_ws_url(&listener)?;

    Ok((listener, url))
}

/// The `ws://host:port/ws` URL served by an `RpcServer` bound to `listener`.
pub fn listener_ws_url(listener: &TcpListener) -> Result<String> {
    let addr = listener.local_addr()?;
    Ok(format!("ws://{addr}/ws"))
}
