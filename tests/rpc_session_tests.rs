use serde_json::{Value, json};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::join;
use wsrpc::{
    Dispatched, FormatError, IndexedFormatError, IndexedRpcError, MethodDescriptor, ProtocolError, RpcError,
    RpcSession, RpcSessionConfig, RpcSessionError, Transport,
};

// --- Test Setup: Mock Implementations ---

/// A transport that answers from a script and records everything it sees.
#[derive(Default)]
struct MockTransport {
    connected: AtomicBool,
    closed: AtomicBool,
    refuse_connect: AtomicBool,
    connect_calls: AtomicUsize,
    connect_timeouts: Mutex<Vec<Duration>>,
    sent: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<io::Result<String>>>,
}

impl MockTransport {
    fn with_responses<I>(responses: I) -> Arc<Self>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        let transport = MockTransport::default();
        transport.responses.lock().unwrap().extend(responses);
        Arc::new(transport)
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&self, timeout: Duration) -> io::Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_timeouts.lock().unwrap().push(timeout);

        // Give concurrent callers a chance to observe the in-flight connect.
        tokio::task::yield_now().await;

        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock refused",
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, payload: String) -> io::Result<String> {
        self.sent.lock().unwrap().push(payload);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::other("no scripted response left")))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A descriptor with a fixed payload and no formatters.
struct RawMethod(String);

impl RawMethod {
    fn named(method: &str) -> Self {
        RawMethod(format!(r#"{{"method":"{method}"}}"#))
    }

    fn with_id(method: &str, id: u64) -> Self {
        RawMethod(format!(r#"{{"jsonrpc":"2.0","method":"{method}","params":[],"id":{id}}}"#))
    }
}

impl MethodDescriptor for RawMethod {
    fn to_payload(&self) -> String {
        self.0.clone()
    }
}

/// Upper-cases every string value it is given.
struct Shout;

impl MethodDescriptor for Shout {
    fn to_payload(&self) -> String {
        r#"{"method":"shout"}"#.into()
    }

    fn transform(&self, values: Vec<Value>) -> Result<Vec<Value>, FormatError> {
        values
            .into_iter()
            .map(|value| match value {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Err(FormatError::new(format!("expected a string, got {other}"))),
            })
            .collect()
    }
}

fn ok(raw: &str) -> io::Result<String> {
    Ok(raw.to_string())
}

fn session_over(transport: &Arc<MockTransport>) -> RpcSession<MockTransport> {
    RpcSession::from_shared(transport.clone(), RpcSessionConfig::default())
}

// --- Single dispatch ---

#[tokio::test]
async fn test_single_dispatch_returns_result() {
    let transport = MockTransport::with_responses([ok(r#"{"result":"0x10"}"#)]);
    let session = session_over(&transport);

    let dispatched = session.dispatch(RawMethod::named("eth_blockNumber")).await.unwrap();

    assert_eq!(dispatched, Dispatched::Response(json!("0x10")));
    assert_eq!(transport.sent(), vec![r#"{"method":"eth_blockNumber"}"#]);
}

#[tokio::test]
async fn test_single_dispatch_connects_lazily_once() {
    let transport = MockTransport::with_responses([
        ok(r#"{"result":1}"#),
        ok(r#"{"result":2}"#),
    ]);
    let session = RpcSession::from_shared(
        transport.clone(),
        RpcSessionConfig::default().with_connect_timeout(Duration::from_millis(250)),
    );
    assert_eq!(transport.connect_calls(), 0);

    assert_eq!(session.call(RawMethod::named("a")).await.unwrap(), json!(1));
    assert_eq!(session.call(RawMethod::named("b")).await.unwrap(), json!(2));

    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(
        *transport.connect_timeouts.lock().unwrap(),
        vec![Duration::from_millis(250)]
    );
}

#[tokio::test]
async fn test_concurrent_first_calls_connect_once() {
    let transport = MockTransport::with_responses([
        ok(r#"{"result":"0x1"}"#),
        ok(r#"{"result":"0x1"}"#),
        ok(r#"{"result":"0x1"}"#),
    ]);
    let session = session_over(&transport);

    let (a, b, c) = join!(
        session.call(RawMethod::named("a")),
        session.call(RawMethod::named("b")),
        session.call(RawMethod::named("c")),
    );

    assert_eq!(a.unwrap(), json!("0x1"));
    assert_eq!(b.unwrap(), json!("0x1"));
    assert_eq!(c.unwrap(), json!("0x1"));
    assert_eq!(transport.connect_calls(), 1);
}

#[tokio::test]
async fn test_single_result_is_wrapped_for_transform() {
    let transport = MockTransport::with_responses([ok(r#"{"result":"quiet"}"#)]);
    let session = session_over(&transport);

    assert_eq!(session.call(Shout).await.unwrap(), json!("QUIET"));
}

#[tokio::test]
async fn test_array_result_is_transformed_whole() {
    let transport = MockTransport::with_responses([ok(r#"{"result":["a","b"]}"#)]);
    let session = session_over(&transport);

    assert_eq!(session.call(Shout).await.unwrap(), json!(["A", "B"]));
}

#[tokio::test]
async fn test_formatter_failure_is_reported() {
    let transport = MockTransport::with_responses([ok(r#"{"result":5}"#)]);
    let session = session_over(&transport);

    match session.call(Shout).await {
        Err(RpcSessionError::Format(err)) => assert!(err.0.contains("expected a string")),
        other => panic!("expected a Format error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_single_rpc_error_is_normalized() {
    let transport = MockTransport::with_responses([ok(
        r#"{"jsonrpc":"2.0","id":1,"error":{"message":"Error: insufficient funds","code":-32000}}"#,
    )]);
    let session = session_over(&transport);

    match session.call(RawMethod::named("eth_sendRawTransaction")).await {
        Err(RpcSessionError::Rpc(err)) => {
            assert_eq!(err, RpcError::new("insufficient funds", -32000));
        }
        other => panic!("expected an Rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_response_is_a_protocol_error() {
    let transport = MockTransport::with_responses([ok("{\"result\":")]);
    let session = session_over(&transport);

    let result = session.call(RawMethod::named("eth_blockNumber")).await;

    assert!(matches!(
        result,
        Err(RpcSessionError::Protocol(ProtocolError::InvalidResponseFormat(_)))
    ));
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_unexpected_shapes_are_protocol_errors() {
    let transport = MockTransport::with_responses([
        ok(r#"{"jsonrpc":"2.0","id":1}"#),
        ok(r#"[{"result":1}]"#),
    ]);
    let session = session_over(&transport);

    assert!(matches!(
        session.call(RawMethod::named("a")).await,
        Err(RpcSessionError::Protocol(ProtocolError::UnexpectedShape))
    ));
    assert!(matches!(
        session.call(RawMethod::named("b")).await,
        Err(RpcSessionError::Protocol(ProtocolError::UnexpectedBatch))
    ));
}

#[tokio::test]
async fn test_invalid_payload_is_rejected_before_io() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    let result = session.call(RawMethod("not a request".into())).await;

    assert!(matches!(result, Err(RpcSessionError::InvalidPayload(_))));
    assert_eq!(transport.connect_calls(), 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_transport_errors_pass_through() {
    let transport = MockTransport::with_responses([]);
    transport.refuse_connect.store(true, Ordering::SeqCst);
    let session = session_over(&transport);

    match session.call(RawMethod::named("a")).await {
        Err(RpcSessionError::Transport(err)) => {
            assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused)
        }
        other => panic!("expected a Transport error, got {other:?}"),
    }
    assert!(transport.sent().is_empty());

    transport.refuse_connect.store(false, Ordering::SeqCst);
    transport
        .responses
        .lock()
        .unwrap()
        .push_back(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));

    match session.call(RawMethod::named("a")).await {
        Err(RpcSessionError::Transport(err)) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("expected a Transport error, got {other:?}"),
    }
}

// --- Batches ---

#[tokio::test]
async fn test_batched_calls_are_queued_without_io() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    assert!(session.is_batching());

    assert_eq!(
        session.dispatch(RawMethod::named("a")).await.unwrap(),
        Dispatched::Queued { position: 0 }
    );
    assert_eq!(
        session.dispatch(RawMethod::named("b")).await.unwrap(),
        Dispatched::Queued { position: 1 }
    );

    assert_eq!(session.pending_len(), 2);
    assert_eq!(transport.connect_calls(), 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_flush_sends_one_envelope_and_returns_in_order() {
    let transport = MockTransport::with_responses([ok(r#"[{"result":"0x1"},{"result":"0x2"}]"#)]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("a")).await.unwrap();
    session.dispatch(RawMethod::named("b")).await.unwrap();

    let results = session.flush().await.unwrap();

    assert_eq!(results, vec![json!("0x1"), json!("0x2")]);
    assert_eq!(
        transport.sent(),
        vec![r#"[{"method":"a"},{"method":"b"}]"#]
    );
    assert!(!session.is_batching());
    assert_eq!(session.pending_len(), 0);
}

#[tokio::test]
async fn test_flush_reports_errors_alongside_partial_results() {
    let transport = MockTransport::with_responses([ok(
        r#"[{"result":"0x1"},{"error":{"message":"Error: bad","code":-32000}}]"#,
    )]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("a")).await.unwrap();
    session.dispatch(RawMethod::named("b")).await.unwrap();

    match session.flush().await {
        Err(RpcSessionError::Batch(failure)) => {
            assert_eq!(
                failure.errors,
                vec![IndexedRpcError {
                    index: 1,
                    error: RpcError::new("bad", -32000),
                }]
            );
            assert_eq!(failure.results, vec![json!("0x1"), Value::Null]);
        }
        other => panic!("expected a Batch error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_flush_keeps_partial_results_when_a_formatter_fails() {
    let transport = MockTransport::with_responses([ok(
        r#"[{"result":"0x1"},{"error":{"message":"Error: bad","code":-32000}},{"result":5}]"#,
    )]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("a")).await.unwrap();
    session.dispatch(RawMethod::named("b")).await.unwrap();
    // Only accepts strings.
    session.dispatch(Shout).await.unwrap();

    match session.flush().await {
        Err(RpcSessionError::Batch(failure)) => {
            assert_eq!(failure.results, vec![json!("0x1"), Value::Null, Value::Null]);
            assert_eq!(
                failure.errors,
                vec![IndexedRpcError {
                    index: 1,
                    error: RpcError::new("bad", -32000),
                }]
            );
            assert_eq!(
                failure.format_errors,
                vec![IndexedFormatError {
                    index: 2,
                    error: FormatError::new("expected a string, got 5"),
                }]
            );
            assert_eq!(failure.failed_indexes().collect::<Vec<_>>(), vec![1, 2]);
        }
        other => panic!("expected a Batch error, got {other:?}"),
    }

    assert!(!session.is_batching());
}

#[tokio::test]
async fn test_flush_applies_each_descriptors_transform() {
    let transport = MockTransport::with_responses([ok(
        r#"[{"result":"hello"},{"result":"0x2"},{"result":["x","y"]},{}]"#,
    )]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(Shout).await.unwrap();
    session.dispatch(RawMethod::named("plain")).await.unwrap();
    session.dispatch(Shout).await.unwrap();
    session.dispatch(Shout).await.unwrap();

    let results = session.flush().await.unwrap();

    // The last element has neither result nor error: permissive null, and
    // nulls are not handed to formatters.
    assert_eq!(
        results,
        vec![json!("HELLO"), json!("0x2"), json!(["X", "Y"]), Value::Null]
    );
}

#[tokio::test]
async fn test_flush_realigns_out_of_order_responses_by_id() {
    let transport = MockTransport::with_responses([ok(
        r#"[{"id":102,"result":"third"},{"id":100,"result":"first"},{"id":101,"error":{"code":-32601,"message":"Method not found"}}]"#,
    )]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::with_id("a", 100)).await.unwrap();
    session.dispatch(RawMethod::with_id("b", 101)).await.unwrap();
    session.dispatch(RawMethod::with_id("c", 102)).await.unwrap();

    match session.flush().await {
        Err(RpcSessionError::Batch(failure)) => {
            assert_eq!(failure.results, vec![json!("first"), Value::Null, json!("third")]);
            assert_eq!(failure.failed_indexes().collect::<Vec<_>>(), vec![1]);
            assert_eq!(failure.errors[0].error.code, -32601);
        }
        other => panic!("expected a Batch error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_flush_without_batch_mode_is_usage_error() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    assert!(matches!(session.flush().await, Err(RpcSessionError::Usage(_))));
    assert_eq!(transport.connect_calls(), 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_flush_clears_pending_calls_when_send_fails() {
    let transport = MockTransport::with_responses([
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "dropped")),
        ok(r#"[{"result":"0x9"}]"#),
    ]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("stale_a")).await.unwrap();
    session.dispatch(RawMethod::named("stale_b")).await.unwrap();

    assert!(matches!(session.flush().await, Err(RpcSessionError::Transport(_))));
    assert_eq!(session.pending_len(), 0);
    assert!(!session.is_batching());

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("fresh")).await.unwrap();
    assert_eq!(session.flush().await.unwrap(), vec![json!("0x9")]);

    assert_eq!(transport.sent()[1], r#"[{"method":"fresh"}]"#);
}

#[tokio::test]
async fn test_flush_length_mismatch_is_protocol_error() {
    let transport = MockTransport::with_responses([ok(r#"[{"result":1}]"#)]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("a")).await.unwrap();
    session.dispatch(RawMethod::named("b")).await.unwrap();

    assert!(matches!(
        session.flush().await,
        Err(RpcSessionError::Protocol(ProtocolError::BatchLengthMismatch {
            expected: 2,
            received: 1,
        }))
    ));
}

#[tokio::test]
async fn test_whole_batch_rejection_is_an_rpc_error() {
    let transport = MockTransport::with_responses([ok(
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"Invalid Request"}}"#,
    )]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("a")).await.unwrap();

    match session.flush().await {
        Err(RpcSessionError::Rpc(err)) => assert_eq!(err.code, -32600),
        other => panic!("expected an Rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_flush_performs_no_io() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    assert_eq!(session.flush().await.unwrap(), Vec::<Value>::new());
    assert!(transport.sent().is_empty());
    assert_eq!(transport.connect_calls(), 0);
}

#[tokio::test]
async fn test_disabling_batch_mode_hands_back_pending_calls() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    session.dispatch(RawMethod::named("a")).await.unwrap();
    session.dispatch(RawMethod::named("b")).await.unwrap();

    // Re-enabling while collecting keeps the queue.
    assert!(session.set_batch_mode(true).is_empty());
    assert_eq!(session.pending_len(), 2);

    let abandoned = session.set_batch_mode(false);
    assert_eq!(abandoned.len(), 2);
    assert_eq!(abandoned[1].payload, r#"{"method":"b"}"#);
    assert_eq!(session.pending_len(), 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_call_is_rejected_while_collecting() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    assert!(matches!(
        session.call(RawMethod::named("a")).await,
        Err(RpcSessionError::Usage(_))
    ));
    assert_eq!(session.pending_len(), 0);
}

#[tokio::test]
async fn test_notification_payload_is_rejected() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    // Would never be answered by a 2.0 node.
    let result = session
        .call(RawMethod(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[]}"#.into()))
        .await;

    assert!(matches!(result, Err(RpcSessionError::InvalidPayload(_))));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_invalid_payload_is_not_queued() {
    let transport = MockTransport::with_responses([]);
    let session = session_over(&transport);

    session.set_batch_mode(true);
    assert!(matches!(
        session.dispatch(RawMethod("[]".into())).await,
        Err(RpcSessionError::InvalidPayload(_))
    ));
    assert_eq!(session.pending_len(), 0);
}

// --- Close ---

#[tokio::test]
async fn test_close_delegates_and_blocks_further_use() {
    let transport = MockTransport::with_responses([ok(r#"{"result":true}"#)]);
    let session = session_over(&transport);

    assert_eq!(session.call(RawMethod::named("a")).await.unwrap(), json!(true));

    session.close().await;
    assert!(session.is_closed());
    assert!(transport.closed.load(Ordering::SeqCst));

    assert!(matches!(
        session.dispatch(RawMethod::named("b")).await,
        Err(RpcSessionError::Usage(_))
    ));
    session.set_batch_mode(true);
    assert!(!session.is_batching());
    assert!(matches!(session.flush().await, Err(RpcSessionError::Usage(_))));

    // Closed wins over a malformed payload.
    assert!(matches!(
        session.dispatch(RawMethod("not a request".into())).await,
        Err(RpcSessionError::Usage(_))
    ));

    // Nothing reconnected after close.
    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(transport.sent().len(), 1);
}
