use std::{io, time::Duration};

use serde::{Deserialize, Serialize};
use socket2::SockRef;
use tokio::net::TcpStream;

/// TCP 套接字级配置项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `TCP_NODELAY` 与 `SO_LINGER` 显式配置化，避免宿主直接操作 `socket2` 或平台常量；
/// - 会话引擎已在用户态合并小消息，默认关闭 Nagle 算法以免叠加延迟。
///
/// ## 核心逻辑（How）
/// - `nodelay` 通过 `TcpStream::set_nodelay` 落地；
/// - `linger` 为 `Some(dur)` 时经 `socket2::SockRef::set_linger` 设置 `SO_LINGER`，
///   关闭阶段超过 `dur` 未发送完即发送 RST；`None` 沿用内核默认。
///
/// ## 设计取舍与注意事项（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；
/// - 若设置过小，仍在发送缓冲区的数据可能被丢弃并触发对端 `ECONNRESET`。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSocketConfig {
    nodelay: bool,
    linger: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }
}

impl TcpSocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    /// 将配置写入已建立的连接。
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger)
    }
}
