use crate::formatters::hex_quantity_to_decimal_string;
use serde_json::{Value, json};
use wsrpc::{FormatError, MethodDescriptor, RpcRequest};

/// `eth_getBalance`, returning the balance in wei as a decimal string.
#[derive(Debug, Clone)]
pub struct EthGetBalance {
    request: RpcRequest,
}

impl EthGetBalance {
    /// Balance of `address` at the `latest` block.
    pub fn new(address: &str) -> Self {
        Self::at_block(address, "latest")
    }

    /// Balance at a block tag (`latest`, `pending`, ...) or hex block number.
    pub fn at_block(address: &str, block: &str) -> Self {
        Self {
            request: RpcRequest::new("eth_getBalance", json!([address, block])),
        }
    }

    pub fn request(&self) -> &RpcRequest {
        &self.request
    }
}

impl MethodDescriptor for EthGetBalance {
    fn to_payload(&self) -> String {
        self.request.to_payload_string()
    }

    fn transform(&self, values: Vec<Value>) -> Result<Vec<Value>, FormatError> {
        values.iter().map(hex_quantity_to_decimal_string).collect()
    }
}
