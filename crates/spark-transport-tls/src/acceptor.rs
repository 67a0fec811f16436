use std::{fmt, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;

use crate::TlsError;

/// 可热替换配置的 TLS 握手器。
///
/// # 设计动机（Why）
/// - 证书轮换不应要求重启监听器或打断已建立的会话；
/// - 监听任务在每次握手前取一次配置快照，读路径无锁。
///
/// # 核心契约（What）
/// - [`replace_config`](Self::replace_config) 对之后开始的握手立即可见；
/// - 已完成握手的连接继续使用各自握手时的配置；
/// - 克隆得到的句柄共享同一份配置，可交给证书管理任务持有。
///
/// # 实现逻辑（How）
/// - 内部为 `Arc<ArcSwap<ServerConfig>>`，`accept` 时 `load_full` 后构造临时的
///   `tokio_rustls::TlsAcceptor`。
#[derive(Clone)]
pub struct TlsAcceptor {
    config: Arc<ArcSwap<ServerConfig>>,
}

impl TlsAcceptor {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(config)),
        }
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self::new(Arc::new(config))
    }

    /// 当前配置的共享快照。
    pub fn config_snapshot(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    /// 替换配置并返回旧值。
    pub fn replace_config(&self, next: Arc<ServerConfig>) -> Arc<ServerConfig> {
        self.config.swap(next)
    }

    /// 以当前配置完成一次服务端握手，超过 `timeout` 即失败。
    pub async fn accept<IO>(&self, stream: IO, timeout: Duration) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let acceptor = tokio_rustls::TlsAcceptor::from(self.config_snapshot());
        match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(TlsError::Handshake { source }),
            Err(_) => Err(TlsError::HandshakeTimeout { timeout }),
        }
    }
}

impl fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}
