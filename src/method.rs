use crate::constants::JSONRPC_VERSION;
use crate::error::FormatError;
use crate::utils::increment_request_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes one remote call: how to encode it, and how to post-process
/// what comes back.
///
/// Output formatters work positionally on a sequence of values. A session
/// hands a scalar result over as a one-element vector and unwraps the single
/// element afterwards; array results are handed over whole.
pub trait MethodDescriptor: Send + Sync {
    /// The serialized JSON-RPC request object.
    fn to_payload(&self) -> String;

    /// Applies the method's output formatters. Identity by default.
    fn transform(&self, values: Vec<Value>) -> Result<Vec<Value>, FormatError> {
        Ok(values)
    }
}

/// A JSON-RPC 2.0 request object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: Value,
}

impl RpcRequest {
    /// Creates a request with a fresh process-unique id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
            id: Value::from(increment_request_id()),
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = id.into();
        self
    }

    pub fn to_payload_string(&self) -> String {
        // Serializing a struct of strings and `Value`s cannot fail; an empty
        // payload would be rejected by the session's validation anyway.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A descriptor with no output formatters. Handy for ad-hoc calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMethod {
    request: RpcRequest,
}

impl RpcMethod {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            request: RpcRequest::new(method, params),
        }
    }

    pub fn request(&self) -> &RpcRequest {
        &self.request
    }
}

impl MethodDescriptor for RpcMethod {
    fn to_payload(&self) -> String {
        self.request.to_payload_string()
    }
}

/// Checks that `payload` is a JSON-RPC request object and returns its id
/// (if it carries a non-null one).
pub(crate) fn validate_request_payload(payload: &str) -> Result<Option<Value>, String> {
    let parsed: Value =
        serde_json::from_str(payload).map_err(|err| format!("payload is not valid JSON: {err}"))?;

    let Value::Object(mut object) = parsed else {
        return Err("payload must be a JSON-RPC request object".into());
    };

    match object.get("method") {
        Some(Value::String(_)) => {}
        _ => return Err("request object has no string `method` member".into()),
    }

    let id = object.remove("id");

    // A 2.0 request without an `id` is a notification and never answered.
    if id.is_none() && object.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION) {
        return Err("JSON-RPC 2.0 request has no `id`; notifications get no response".into());
    }

    Ok(id.filter(|id| !id.is_null()))
}
