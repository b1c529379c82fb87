//! Runtime-agnostic JSON-RPC session orchestration.
//!
//! An [`RpcSession`] sits on top of any [`Transport`] (a persistent,
//! message-oriented connection) and turns [`MethodDescriptor`]s into
//! request payloads, either one at a time or collected into a single batch
//! envelope. Raw responses are classified by the [`ResponseDecoder`] and run
//! through each descriptor's output formatters before they reach the caller.
//!
//! Concrete transports live in the `extensions/` crates.

pub mod constants;
pub mod decoder;
pub mod error;
pub mod method;
pub mod session;
pub mod transport;
pub mod utils;

pub use decoder::{BatchEntry, DecodedResponse, ResponseDecoder, apply_transform};
pub use error::{
    BatchFailure, FormatError, IndexedFormatError, IndexedRpcError, ProtocolError, RpcError,
    RpcSessionError,
};
pub use method::{MethodDescriptor, RpcMethod, RpcRequest};
pub use session::{BatchAccumulator, Dispatched, PendingCall, RpcSession, RpcSessionConfig};
pub use transport::{Transport, TransportState};
