use crate::formatters::lowercase;
use serde_json::{Value, json};
use wsrpc::{FormatError, MethodDescriptor, RpcRequest};

/// `eth_accounts`, with every address lowercased.
///
/// The result is an array, so the session hands the formatter the whole
/// list at once.
#[derive(Debug, Clone)]
pub struct EthAccounts {
    request: RpcRequest,
}

impl EthAccounts {
    pub fn new() -> Self {
        Self {
            request: RpcRequest::new("eth_accounts", json!([])),
        }
    }
}

impl Default for EthAccounts {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodDescriptor for EthAccounts {
    fn to_payload(&self) -> String {
        self.request.to_payload_string()
    }

    fn transform(&self, values: Vec<Value>) -> Result<Vec<Value>, FormatError> {
        values.iter().map(lowercase).collect()
    }
}
