use serde_json::json;
use wsrpc::{MethodDescriptor, RpcRequest};

/// `web3_clientVersion`. The result is passed through unchanged.
#[derive(Debug, Clone)]
pub struct Web3ClientVersion {
    request: RpcRequest,
}

impl Web3ClientVersion {
    pub fn new() -> Self {
        Self {
            request: RpcRequest::new("web3_clientVersion", json!([])),
        }
    }
}

impl Default for Web3ClientVersion {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodDescriptor for Web3ClientVersion {
    fn to_payload(&self) -> String {
        self.request.to_payload_string()
    }
}
