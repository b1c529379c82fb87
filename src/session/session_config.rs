use crate::constants::DEFAULT_CONNECT_TIMEOUT;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSessionConfig {
    /// Passed to `Transport::connect` when the session finds the transport
    /// disconnected before a send. Zero disables the limit.
    pub connect_timeout: Duration,
}

impl Default for RpcSessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl RpcSessionConfig {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}
