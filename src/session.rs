mod batch_accumulator;
mod rpc_session;
mod session_config;

pub use batch_accumulator::{BatchAccumulator, PendingCall, correlate};
pub use rpc_session::{Dispatched, RpcSession};
pub use session_config::RpcSessionConfig;
