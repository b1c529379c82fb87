use std::time::Duration;

/// Protocol version written into every outgoing request.
pub const JSONRPC_VERSION: &str = "2.0";

/// How long a session waits for the transport to come up before the first
/// send. A zero duration disables the limit.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Prefix some nodes put in front of their error messages
/// (e.g. `"Error: execution reverted"`). Stripped during decoding.
pub const RPC_ERROR_MESSAGE_PREFIX: &str = "Error: ";

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
