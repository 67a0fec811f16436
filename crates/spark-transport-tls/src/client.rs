use std::sync::Arc;

use rustls::{ClientConfig, pki_types::ServerName};
use spark_session::{Session, SessionFactory};
use spark_transport_tcp::{TcpError, TcpSocketConfig, error as tcp_error, open_session};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::{DEFAULT_HANDSHAKE_TIMEOUT, TlsError};

/// TLS 客户端引擎：建连、握手并打开会话。
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsClient;

impl TlsClient {
    /// 连接 `addr` 并以 `server_name` 作为 SNI 与证书校验名完成握手。
    pub async fn connect<M: 'static>(
        addr: impl ToSocketAddrs,
        server_name: &str,
        config: Arc<ClientConfig>,
        factory: &SessionFactory<M>,
    ) -> Result<Session<M>, TlsError> {
        let name = ServerName::try_from(server_name.to_owned()).map_err(|_| {
            TlsError::InvalidServerName {
                name: server_name.to_owned(),
            }
        })?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| TcpError::new(tcp_error::CONNECT, err))?;
        TcpSocketConfig::default()
            .apply(&stream)
            .map_err(|err| TcpError::new(tcp_error::CONFIGURE, err))?;
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();

        let connector = TlsConnector::from(config);
        let tls = match tokio::time::timeout(DEFAULT_HANDSHAKE_TIMEOUT, connector.connect(name, stream))
            .await
        {
            Ok(Ok(tls)) => tls,
            Ok(Err(source)) => return Err(TlsError::Handshake { source }),
            Err(_) => {
                return Err(TlsError::HandshakeTimeout {
                    timeout: DEFAULT_HANDSHAKE_TIMEOUT,
                });
            }
        };
        debug!(peer = ?peer, server_name, "tls handshake completed");
        Ok(open_session(factory, tls, peer, local))
    }
}
