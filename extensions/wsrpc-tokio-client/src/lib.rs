mod correlation;
mod ws_transport;

pub use ws_transport::WsTransport;
pub use wsrpc::{RpcSession, RpcSessionConfig, RpcSessionError, Transport, TransportState};

/// A session driving a [`WsTransport`].
pub type WsRpcSession = RpcSession<WsTransport>;
