use std::{io, time::Duration};

use rustls::{AlertDescription, Error as RustlsError};
use spark_transport_tcp::{TcpError, is_retryable_io};
use thiserror::Error;

/// TLS 传输错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - TCP 层失败（绑定、建连、套接字设置）原样透传 [`TcpError`]，TLS 层只补充握手相关的失败；
/// - 握手失败需要区分“安全违规”（证书不可信、报文被篡改）与“瞬时故障”，
///   运维据此决定告警还是重试。
///
/// ## 逻辑（How）
/// - `tokio-rustls` 把协议错误装进 `io::Error`，[`TlsError::is_security`] 通过
///   `io::Error::get_ref` 向下转型取回 `rustls::Error` 再分类；
/// - 其余 I/O 错误沿用 TCP 层的可重试判定。
///
/// ## 契约（What）
/// - [`code`](TlsError::code) 返回稳定错误码：TCP 变体沿用 `spark.transport.tcp.*`，
///   其余为 `spark.transport.tls.*`。
#[derive(Debug, Error)]
pub enum TlsError {
    #[error(transparent)]
    Tcp(#[from] TcpError),
    #[error("tls handshake: {source}")]
    Handshake {
        #[source]
        source: io::Error,
    },
    #[error("tls handshake timed out after {timeout:?}")]
    HandshakeTimeout { timeout: Duration },
    #[error("invalid tls server name `{name}`")]
    InvalidServerName { name: String },
}

impl TlsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Tcp(err) => err.code(),
            Self::Handshake { .. } => "spark.transport.tls.handshake_failed",
            Self::HandshakeTimeout { .. } => "spark.transport.tls.handshake_timeout",
            Self::InvalidServerName { .. } => "spark.transport.tls.invalid_server_name",
        }
    }

    /// 握手是否因安全原因失败（证书校验、完整性或协议违规）。
    pub fn is_security(&self) -> bool {
        match self {
            Self::Handshake { source } => rustls_error(source).is_some_and(is_security_violation),
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tcp(err) => err.is_retryable(),
            Self::Handshake { source } => match rustls_error(source) {
                Some(err) => !is_security_violation(err),
                None => is_retryable_io(source),
            },
            Self::HandshakeTimeout { .. } => true,
            Self::InvalidServerName { .. } => false,
        }
    }
}

fn rustls_error(error: &io::Error) -> Option<&RustlsError> {
    error.get_ref()?.downcast_ref::<RustlsError>()
}

fn is_security_violation(error: &RustlsError) -> bool {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord
        | NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType
        | NoApplicationProtocol => true,
        AlertReceived(alert) => is_security_alert(alert),
        _ => false,
    }
}

fn is_security_alert(alert: &AlertDescription) -> bool {
    use AlertDescription::*;
    !matches!(
        alert,
        CloseNotify | UserCanceled | NoRenegotiation | DecompressionFailure | Unknown(_)
    )
}
