use serde_json::{Value, json};
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use wsrpc::RpcError;
use wsrpc_tokio_server::RpcServer;
use wsrpc_tokio_server::utils::bind_ws_listener_on_random_port;

/// Starts a local node with canned answers for the example Ethereum methods.
///
/// Returns the URL to dial and the task running the server.
pub async fn spawn_demo_node() -> io::Result<(String, JoinHandle<()>)> {
    let (listener, url) = bind_ws_listener_on_random_port().await?;
    let server = RpcServer::new();

    let registrations = [
        server
            .register_method("web3_clientVersion", |_| async {
                Ok(json!("wsrpc-demo/v0.1.0"))
            })
            .await,
        server
            .register_method("eth_blockNumber", |_| async { Ok(json!("0x12a05f2")) })
            .await,
        server
            .register_method("eth_getBalance", |params: Value| async move {
                match params[0].as_str() {
                    Some(address) if address.starts_with("0x") => Ok(json!("0xde0b6b3a7640000")),
                    _ => Err(RpcError::new("Error: invalid address", -32602)),
                }
            })
            .await,
        server
            .register_method("eth_accounts", |_| async {
                Ok(json!([
                    "0x5AEDA56215b167893e80B4fE645BA6d5Bab767DE",
                    "0x6330A553Fc93768F612722BB8c2eC78aC90B3bbc"
                ]))
            })
            .await,
    ];
    for registration in registrations {
        registration.map_err(io::Error::other)?;
    }

    let server_task = tokio::spawn(async move {
        if let Err(err) = Arc::new(server).serve_with_listener(listener).await {
            tracing::error!("demo node stopped: {}", err);
        }
    });

    Ok((url, server_task))
}
