use std::{io, net::SocketAddr};

use spark_transport_tcp::is_retryable_io;
use thiserror::Error;

/// UDP 传输错误。
#[derive(Debug, Error)]
pub enum UdpError {
    /// 绑定失败。
    #[error("udp bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// 查询本地地址失败。
    #[error("udp local address: {0}")]
    LocalAddr(#[source] io::Error),
    /// 该对端已有在线会话。
    #[error("udp peer {peer} already has a live session")]
    PeerExists { peer: SocketAddr },
    /// 端点已停止。
    #[error("udp endpoint is shut down")]
    ShutDown,
}

impl UdpError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "spark.transport.udp.bind_failed",
            Self::LocalAddr(_) => "spark.transport.udp.local_addr_failed",
            Self::PeerExists { .. } => "spark.transport.udp.peer_exists",
            Self::ShutDown => "spark.transport.udp.shut_down",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Bind { source, .. } | Self::LocalAddr(source) => is_retryable_io(source),
            Self::PeerExists { .. } | Self::ShutDown => false,
        }
    }
}
