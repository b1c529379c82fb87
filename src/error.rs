use crate::constants::RPC_ERROR_MESSAGE_PREFIX;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use thiserror::Error;

/// An `error` object returned by the remote endpoint.
///
/// The message is normalized on decode: a leading `"Error: "` is removed.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(message: impl Into<String>, code: i64) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builds an `RpcError` from the `error` member of a response.
    ///
    /// Nodes are not consistent here, so this is lenient: a missing `code`
    /// becomes `0`, a missing `message` becomes empty, and a bare string is
    /// taken as the message.
    pub fn from_error_value(error: Value) -> Self {
        match error {
            Value::Object(mut object) => {
                let code = object.get("code").and_then(Value::as_i64).unwrap_or(0);
                let message = match object.remove("message") {
                    Some(Value::String(message)) => message,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                let data = object.remove("data").filter(|data| !data.is_null());

                Self {
                    code,
                    message: strip_error_prefix(&message).to_owned(),
                    data,
                }
            }
            Value::String(message) => Self::new(strip_error_prefix(&message), 0),
            other => Self::new(other.to_string(), 0),
        }
    }
}

pub(crate) fn strip_error_prefix(message: &str) -> &str {
    message
        .strip_prefix(RPC_ERROR_MESSAGE_PREFIX)
        .unwrap_or(message)
}

/// The transport round trip worked, but what came back is not a usable
/// JSON-RPC response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),

    #[error("unexpected response shape")]
    UnexpectedShape,

    #[error("batch response has {received} entries, expected {expected}")]
    BatchLengthMismatch { expected: usize, received: usize },

    #[error("expected a single response object, received a batch")]
    UnexpectedBatch,

    #[error("expected a batch response array, received a single response")]
    UnexpectedSingle,
}

/// An output formatter refused a value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("output formatter failed: {0}")]
pub struct FormatError(pub String);

impl FormatError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// An `RpcError` tagged with the position of the call it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRpcError {
    pub index: usize,
    pub error: RpcError,
}

/// A `FormatError` tagged with the position of the call it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFormatError {
    pub index: usize,
    pub error: FormatError,
}

/// One or more positions of a flushed batch failed: the node answered with
/// an `error`, or the call's output formatter refused the result.
///
/// `results` always has one slot per flushed call, in dispatch order, with
/// `null` at every failed position, so the successful subset can still be
/// recovered by pairing the lists.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub errors: Vec<IndexedRpcError>,
    pub format_errors: Vec<IndexedFormatError>,
    pub results: Vec<Value>,
}

impl BatchFailure {
    /// Positions that failed for any reason, ascending.
    pub fn failed_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        let mut indexes: Vec<usize> = self
            .errors
            .iter()
            .map(|indexed| indexed.index)
            .chain(self.format_errors.iter().map(|indexed| indexed.index))
            .collect();
        indexes.sort_unstable();
        indexes.into_iter()
    }

    fn failure_count(&self) -> usize {
        self.errors.len() + self.format_errors.len()
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} batched calls failed",
            self.failure_count(),
            self.results.len()
        )?;

        let first_rpc = self.errors.first();
        let first_format = self.format_errors.first();
        match (first_rpc, first_format) {
            (Some(rpc), Some(format)) if format.index < rpc.index => {
                write!(f, " (first at position {}: {})", format.index, format.error)
            }
            (Some(rpc), _) => write!(f, " (first at position {}: {})", rpc.index, rpc.error),
            (None, Some(format)) => {
                write!(f, " (first at position {}: {})", format.index, format.error)
            }
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for BatchFailure {}

/// Everything an `RpcSession` operation can fail with.
#[derive(Error, Debug)]
pub enum RpcSessionError {
    /// The descriptor produced something that is not a JSON-RPC request
    /// object. Reported before any I/O.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Connecting or sending failed. The transport's error is passed through.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Batch(BatchFailure),

    /// Local misuse of the session, e.g. flushing outside batch mode.
    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl RpcSessionError {
    pub(crate) fn usage(reason: impl Into<String>) -> Self {
        RpcSessionError::Usage(reason.into())
    }
}
