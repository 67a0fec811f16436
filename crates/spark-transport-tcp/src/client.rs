use spark_session::{Session, SessionFactory};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::{
    TcpSocketConfig,
    error::{self, TcpError},
    stream::open_session,
};

/// TCP 客户端引擎：主动建立连接并创建会话。
///
/// 出站会话与入站会话走同一套创建流程，处理器收到的事件序列没有差别。
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpClient;

impl TcpClient {
    /// 连接到 `addr`，按 `config` 设置套接字后打开会话。
    pub async fn connect<M: 'static>(
        addr: impl ToSocketAddrs,
        factory: &SessionFactory<M>,
        config: TcpSocketConfig,
    ) -> Result<Session<M>, TcpError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| TcpError::new(error::CONNECT, err))?;
        config
            .apply(&stream)
            .map_err(|err| TcpError::new(error::CONFIGURE, err))?;
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        debug!(peer = ?peer, "tcp connection established");
        Ok(open_session(factory, stream, peer, local))
    }
}
