mod rpc_server;
pub mod utils;

pub use rpc_server::{RpcMethodHandler, RpcServer, RpcServerError};
pub use wsrpc::RpcError;
