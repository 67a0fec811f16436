use serde::{Deserialize, Serialize};

/// UDP 端点选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - UDP 没有流量控制，会话未及时读取时报文只能暂存或丢弃，暂存上限必须显式配置；
/// - 超过 `max_datagram_size` 的报文在接收时即被识别并丢弃，避免被截断后交给解码器。
///
/// ## 契约（What）
/// - `max_datagram_size`：接受的最大报文长度，默认 65507（IPv4 下 UDP 载荷上限）；
/// - `peer_backlog`：每个对端在没有挂起读时最多暂存的报文数，默认 64，溢出的报文被丢弃并告警。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpOptions {
    max_datagram_size: usize,
    peer_backlog: usize,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            max_datagram_size: 65_507,
            peer_backlog: 64,
        }
    }
}

impl UdpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    pub fn with_peer_backlog(mut self, backlog: usize) -> Self {
        self.peer_backlog = backlog;
        self
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    pub fn peer_backlog(&self) -> usize {
        self.peer_backlog
    }
}
