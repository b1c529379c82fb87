use crate::formatters::hex_quantity_to_u64;
use serde_json::{Value, json};
use wsrpc::{FormatError, MethodDescriptor, RpcRequest};

/// `eth_blockNumber`, with the hex quantity converted to a number.
#[derive(Debug, Clone)]
pub struct EthBlockNumber {
    request: RpcRequest,
}

impl EthBlockNumber {
    pub fn new() -> Self {
        Self {
            request: RpcRequest::new("eth_blockNumber", json!([])),
        }
    }

    pub fn request(&self) -> &RpcRequest {
        &self.request
    }
}

impl Default for EthBlockNumber {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodDescriptor for EthBlockNumber {
    fn to_payload(&self) -> String {
        self.request.to_payload_string()
    }

    fn transform(&self, values: Vec<Value>) -> Result<Vec<Value>, FormatError> {
        values.iter().map(hex_quantity_to_u64).collect()
    }
}
