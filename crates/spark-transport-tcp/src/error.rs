use std::io;

use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const BIND: OperationKind = OperationKind {
    code: "spark.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub const ACCEPT: OperationKind = OperationKind {
    code: "spark.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub const CONNECT: OperationKind = OperationKind {
    code: "spark.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.tcp.configure_failed",
    message: "tcp configure",
};

/// TCP 传输错误：底层 I/O 错误加上发生错误的操作。
#[derive(Debug, Error)]
#[error("{}: {}", .kind.message, .source)]
pub struct TcpError {
    kind: OperationKind,
    #[source]
    source: io::Error,
}

impl TcpError {
    pub fn new(kind: OperationKind, source: io::Error) -> Self {
        Self { kind, source }
    }

    /// 稳定错误码，例如 `spark.transport.tcp.bind_failed`。
    pub fn code(&self) -> &'static str {
        self.kind.code
    }

    pub fn operation(&self) -> OperationKind {
        self.kind
    }

    pub fn io_error(&self) -> &io::Error {
        &self.source
    }

    /// 按 `io::ErrorKind` 判断稍后重试是否可能成功。
    pub fn is_retryable(&self) -> bool {
        is_retryable_io(&self.source)
    }
}

/// 连接级瞬时故障视为可重试；权限、参数类错误不可重试。
pub fn is_retryable_io(error: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe
            | ErrorKind::WriteZero
    )
}
