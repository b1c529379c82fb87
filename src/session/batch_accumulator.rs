use crate::decoder::BatchEntry;
use crate::error::{ProtocolError, RpcError};
use crate::method::MethodDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A call held back while the session is collecting a batch.
#[derive(Clone)]
pub struct PendingCall {
    pub method: Arc<dyn MethodDescriptor>,
    /// The already validated request object.
    pub payload: String,
    /// The request's `id`, when it has a non-null one.
    pub request_id: Option<Value>,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("payload", &self.payload)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Ordered buffer of pending calls.
///
/// Not synchronized; the owning session serializes access.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    pending: Vec<PendingCall>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call and returns its position in the batch.
    pub fn add(&mut self, call: PendingCall) -> usize {
        self.pending.push(call);
        self.pending.len() - 1
    }

    pub fn snapshot(&self) -> Vec<PendingCall> {
        self.pending.clone()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Snapshot and clear in one step.
    pub fn take(&mut self) -> Vec<PendingCall> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Joins the payloads of `calls` into one batch envelope: `[p1,p2,...]`.
    pub fn envelope(calls: &[PendingCall]) -> String {
        let body_len: usize = calls.iter().map(|call| call.payload.len() + 1).sum();
        let mut envelope = String::with_capacity(body_len + 2);

        envelope.push('[');
        for (position, call) in calls.iter().enumerate() {
            if position > 0 {
                envelope.push(',');
            }
            envelope.push_str(&call.payload);
        }
        envelope.push(']');

        envelope
    }
}

/// Lines up a decoded batch response with the calls that produced it.
///
/// The result has exactly one outcome per call, in dispatch order. When every
/// call and every entry carries an id and the ids match one-to-one, entries
/// are matched by id, so nodes that answer out of order are handled.
/// Otherwise entries are matched by position.
pub fn correlate(
    calls: &[PendingCall],
    entries: Vec<BatchEntry>,
) -> Result<Vec<Result<Value, RpcError>>, ProtocolError> {
    if calls.len() != entries.len() {
        return Err(ProtocolError::BatchLengthMismatch {
            expected: calls.len(),
            received: entries.len(),
        });
    }

    if let Some(call_keys) = matching_id_keys(calls, &entries) {
        let mut by_id: HashMap<String, Result<Value, RpcError>> = entries
            .into_iter()
            .filter_map(|entry| Some((entry.id?.to_string(), entry.outcome)))
            .collect();

        return Ok(call_keys
            .iter()
            .map(|key| by_id.remove(key).unwrap_or(Ok(Value::Null)))
            .collect());
    }

    Ok(entries.into_iter().map(|entry| entry.outcome).collect())
}

/// Returns the id key of every call (in call order) when the call ids and
/// the entry ids are the same set of unique values.
fn matching_id_keys(calls: &[PendingCall], entries: &[BatchEntry]) -> Option<Vec<String>> {
    let call_keys: Vec<String> = calls
        .iter()
        .map(|call| call.request_id.as_ref().map(Value::to_string))
        .collect::<Option<_>>()?;
    let mut entry_keys: Vec<String> = entries
        .iter()
        .map(|entry| entry.id.as_ref().map(Value::to_string))
        .collect::<Option<_>>()?;

    let mut sorted_call_keys = call_keys.clone();
    sorted_call_keys.sort_unstable();
    sorted_call_keys.dedup();
    entry_keys.sort_unstable();

    (sorted_call_keys.len() == calls.len() && sorted_call_keys == entry_keys).then_some(call_keys)
}
