use super::{BatchAccumulator, PendingCall, RpcSessionConfig, correlate};
use crate::decoder::{DecodedResponse, ResponseDecoder, apply_transform};
use crate::error::{
    BatchFailure, IndexedFormatError, IndexedRpcError, ProtocolError, RpcSessionError,
};
use crate::method::{MethodDescriptor, validate_request_payload};
use crate::transport::Transport;
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What happened to a dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// The call went out on its own and this is its transformed result.
    Response(Value),
    /// The session is collecting a batch; the call will be sent on `flush`.
    Queued { position: usize },
}

enum SessionState {
    Idle,
    Collecting(BatchAccumulator),
    Closed,
}

/// Drives JSON-RPC calls over a [`Transport`].
///
/// ```text
/// Idle --set_batch_mode(true)--> Collecting --flush()--> Idle
///   \                                                    /
///    `-------------------- close() --> Closed <---------'
/// ```
///
/// Batch state is guarded by a plain mutex that is never held across an
/// `.await`. Building a batch from several tasks at once is not ordered in
/// any useful way; callers should build each batch from one task.
pub struct RpcSession<T: Transport> {
    transport: Arc<T>,
    config: RpcSessionConfig,
    state: Mutex<SessionState>,
    /// Serializes connect attempts from concurrent first sends.
    connect_gate: futures::lock::Mutex<()>,
}

impl<T: Transport> RpcSession<T> {
    pub fn new(transport: T) -> Self {
        Self::from_shared(Arc::new(transport), RpcSessionConfig::default())
    }

    pub fn with_config(transport: T, config: RpcSessionConfig) -> Self {
        Self::from_shared(Arc::new(transport), config)
    }

    /// Builds a session over a transport that is shared with other owners.
    pub fn from_shared(transport: Arc<T>, config: RpcSessionConfig) -> Self {
        Self {
            transport,
            config,
            state: Mutex::new(SessionState::Idle),
            connect_gate: futures::lock::Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &RpcSessionConfig {
        &self.config
    }

    pub fn is_batching(&self) -> bool {
        matches!(*self.state(), SessionState::Collecting(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state(), SessionState::Closed)
    }

    /// Number of calls waiting for the next `flush`.
    pub fn pending_len(&self) -> usize {
        match &*self.state() {
            SessionState::Collecting(accumulator) => accumulator.len(),
            _ => 0,
        }
    }

    /// Dispatches a call.
    ///
    /// Outside batch mode the call is sent right away and the transformed
    /// result is returned. In batch mode it is queued and nothing is sent.
    pub async fn dispatch<M>(&self, method: M) -> Result<Dispatched, RpcSessionError>
    where
        M: MethodDescriptor + 'static,
    {
        self.dispatch_shared(Arc::new(method)).await
    }

    /// Same as [`RpcSession::dispatch`] for an already shared descriptor.
    pub async fn dispatch_shared(
        &self,
        method: Arc<dyn MethodDescriptor>,
    ) -> Result<Dispatched, RpcSessionError> {
        if self.is_closed() {
            return Err(RpcSessionError::usage("session is closed"));
        }

        let payload = method.to_payload();
        let request_id =
            validate_request_payload(&payload).map_err(RpcSessionError::InvalidPayload)?;

        {
            let mut state = self.state();
            match &mut *state {
                SessionState::Closed => {
                    return Err(RpcSessionError::usage("session is closed"));
                }
                SessionState::Collecting(accumulator) => {
                    let position = accumulator.add(PendingCall {
                        method,
                        payload,
                        request_id,
                    });
                    tracing::debug!(position, "queued call into batch");
                    return Ok(Dispatched::Queued { position });
                }
                SessionState::Idle => {}
            }
        }

        tracing::debug!(request_id = ?request_id, "dispatching call");
        let raw = self.send_payload(payload).await?;

        match ResponseDecoder::decode(&raw)? {
            DecodedResponse::Single(Ok(value)) => {
                Ok(Dispatched::Response(apply_transform(method.as_ref(), value)?))
            }
            DecodedResponse::Single(Err(rpc_error)) => Err(rpc_error.into()),
            DecodedResponse::Batch(_) => Err(ProtocolError::UnexpectedBatch.into()),
        }
    }

    /// Sends a call outside batch mode and returns its transformed result.
    pub async fn call<M>(&self, method: M) -> Result<Value, RpcSessionError>
    where
        M: MethodDescriptor + 'static,
    {
        if self.is_batching() {
            return Err(RpcSessionError::usage(
                "a batch is being collected; use dispatch() and flush() instead",
            ));
        }

        match self.dispatch(method).await? {
            Dispatched::Response(value) => Ok(value),
            Dispatched::Queued { .. } => Err(RpcSessionError::usage(
                "call was queued into a batch started concurrently",
            )),
        }
    }

    /// Enters or leaves batch mode.
    ///
    /// Entering keeps whatever is already queued. Leaving does not flush;
    /// the calls that were queued and never sent are handed back.
    pub fn set_batch_mode(&self, enabled: bool) -> Vec<PendingCall> {
        let mut state = self.state();

        if enabled {
            if matches!(*state, SessionState::Idle) {
                *state = SessionState::Collecting(BatchAccumulator::new());
                tracing::debug!("batch mode enabled");
            }
            return Vec::new();
        }

        match std::mem::replace(&mut *state, SessionState::Idle) {
            SessionState::Collecting(mut accumulator) => {
                let abandoned = accumulator.take();
                if !abandoned.is_empty() {
                    tracing::warn!(
                        abandoned = abandoned.len(),
                        "batch mode disabled with unflushed calls"
                    );
                }
                abandoned
            }
            other => {
                *state = other;
                Vec::new()
            }
        }
    }

    /// Sends every queued call as one batch and returns to `Idle`.
    ///
    /// The queue is emptied before anything is sent, so a failed flush never
    /// leaks calls into the next batch. Results come back in dispatch order;
    /// if any position failed the error carries both the per-position errors
    /// and the partial results.
    pub async fn flush(&self) -> Result<Vec<Value>, RpcSessionError> {
        let calls = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, SessionState::Idle) {
                SessionState::Collecting(mut accumulator) => accumulator.take(),
                other => {
                    let reason = match &other {
                        SessionState::Closed => "session is closed",
                        _ => "batch mode is not enabled; call set_batch_mode(true) first",
                    };
                    *state = other;
                    return Err(RpcSessionError::usage(reason));
                }
            }
        };

        if calls.is_empty() {
            tracing::debug!("flushed an empty batch");
            return Ok(Vec::new());
        }

        tracing::debug!(calls = calls.len(), "flushing batch");
        let raw = self.send_payload(BatchAccumulator::envelope(&calls)).await?;

        let entries = match ResponseDecoder::decode(&raw)? {
            DecodedResponse::Batch(entries) => entries,
            // A node that rejects the whole envelope answers with one error.
            DecodedResponse::Single(Err(rpc_error)) => return Err(rpc_error.into()),
            DecodedResponse::Single(Ok(_)) => return Err(ProtocolError::UnexpectedSingle.into()),
        };

        let mut results = Vec::with_capacity(calls.len());
        let mut errors = Vec::new();
        let mut format_errors = Vec::new();

        for (index, (call, outcome)) in calls.iter().zip(correlate(&calls, entries)?).enumerate() {
            match outcome {
                Ok(Value::Null) => results.push(Value::Null),
                Ok(value) => match apply_transform(call.method.as_ref(), value) {
                    Ok(formatted) => results.push(formatted),
                    Err(error) => {
                        results.push(Value::Null);
                        format_errors.push(IndexedFormatError { index, error });
                    }
                },
                Err(error) => {
                    results.push(Value::Null);
                    errors.push(IndexedRpcError { index, error });
                }
            }
        }

        if errors.is_empty() && format_errors.is_empty() {
            Ok(results)
        } else {
            tracing::debug!(
                failed = errors.len(),
                unformatted = format_errors.len(),
                "batch returned errors"
            );
            Err(RpcSessionError::Batch(BatchFailure {
                errors,
                format_errors,
                results,
            }))
        }
    }

    /// Closes the transport. Every later dispatch or flush is a usage error.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state(), SessionState::Closed);
        if let SessionState::Collecting(accumulator) = previous {
            if !accumulator.is_empty() {
                tracing::warn!(
                    abandoned = accumulator.len(),
                    "session closed with unflushed calls"
                );
            }
        }

        self.transport.close().await;
        tracing::info!("session closed");
    }

    async fn send_payload(&self, payload: String) -> Result<String, RpcSessionError> {
        self.ensure_connected().await?;
        Ok(self.transport.send(payload).await?)
    }

    async fn ensure_connected(&self) -> io::Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }

        let _gate = self.connect_gate.lock().await;

        // Another caller may have connected while we waited for the gate.
        if self.transport.is_connected() {
            return Ok(());
        }

        tracing::info!(
            timeout = ?self.config.connect_timeout,
            "transport not connected; connecting"
        );
        self.transport.connect(self.config.connect_timeout).await
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        // The state is only ever swapped whole, so a poisoned lock still
        // holds a consistent value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
