use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide request id counter. Starts at 1 so that `0` never shows up
/// on the wire (some nodes treat a falsy id as a notification).
static GLOBAL_REQUEST_ID_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Returns the next JSON-RPC request id.
///
/// Ids are unique for the lifetime of the process, which is what lets a
/// batch response be matched back to its requests by id even when a node
/// answers out of order.
#[inline]
pub fn increment_request_id() -> u64 {
    GLOBAL_REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}
