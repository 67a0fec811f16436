use std::time::Duration;

use serde::{Deserialize, Serialize};
use spark_transport_tcp::TcpSocketConfig;

/// 握手超时默认值。
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS 服务端选项。
///
/// - `handshake_timeout`：单个连接从接受到握手完成的时限，防止慢速客户端长期占用资源；
/// - `socket`：握手前应用到 TCP 连接的套接字选项。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsServerOptions {
    handshake_timeout: Duration,
    socket: TcpSocketConfig,
}

impl Default for TlsServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            socket: TcpSocketConfig::default(),
        }
    }
}

impl TlsServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_socket(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn socket(&self) -> &TcpSocketConfig {
        &self.socket
    }
}
