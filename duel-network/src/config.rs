use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Configuration for the TCP request/response transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpRpcConfig {
    /// Local address servers bind to
    pub bind_addr: SocketAddr,
    /// Timeout for dialing a leader
    pub connect_timeout: Duration,
    /// Timeout for one request/response exchange, dial included
    pub call_timeout: Duration,
    /// Maximum message size (in bytes)
    pub max_message_size: usize,
}

impl Default for TcpRpcConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

impl TcpRpcConfig {
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}
