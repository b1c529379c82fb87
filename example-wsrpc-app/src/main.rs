use example_wsrpc_app::spawn_demo_node;
use example_wsrpc_method_definitions::{
    EthAccounts, EthBlockNumber, EthGetBalance, Web3ClientVersion,
};
use std::time::Duration;
use tokio::join;
use tracing_subscriber::EnvFilter;
use wsrpc::{RpcSession, RpcSessionConfig, RpcSessionError};
use wsrpc_tokio_client::WsTransport;

const ADDRESS: &str = "0x5aeda56215b167893e80b4fe645ba6d5bab767de";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // Point `WSRPC_URL` at a real node to skip the local one.
    let url = match std::env::var("WSRPC_URL") {
        Ok(url) => url,
        Err(_) => spawn_demo_node().await?.0,
    };

    let session = RpcSession::with_config(
        WsTransport::new(url),
        RpcSessionConfig::default().with_connect_timeout(Duration::from_secs(5)),
    );

    // Single calls may be in flight together.
    let (version, block) = join!(
        session.call(Web3ClientVersion::new()),
        session.call(EthBlockNumber::new()),
    );
    println!("Client version: {:?}", version?);
    println!("Block number: {:?}", block?);

    session.set_batch_mode(true);
    session.dispatch(EthBlockNumber::new()).await?;
    session.dispatch(EthGetBalance::new(ADDRESS)).await?;
    session.dispatch(EthAccounts::new()).await?;

    match session.flush().await {
        Ok(results) => println!("Batch results: {:?}", results),
        Err(RpcSessionError::Batch(failure)) => {
            println!("Partial batch results: {:?}", failure.results);
            for failed in &failure.errors {
                println!("Call {} failed: {}", failed.index, failed.error);
            }
        }
        Err(err) => return Err(err.into()),
    }

    session.close().await;
    Ok(())
}
