use std::{any::Any, time::Duration};

use thiserror::Error;

/// 业务回调与编解码器使用的通用错误载体。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 编解码失败。
///
/// 读路径上的任何 `CodecError` 都被视为会话致命错误：引擎发出
/// [`StateEvent::DecodeError`](crate::StateEvent::DecodeError) 后立即关闭会话；
/// 写路径上的编码失败同理，对应 [`StateEvent::EncodeError`](crate::StateEvent::EncodeError)。
#[derive(Debug, Error)]
pub enum CodecError {
    /// 字节流不符合协议格式。
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// 单帧长度超过编解码器允许的上限。
    #[error("frame length {len} exceeds limit {limit}")]
    FrameTooLarge { len: usize, limit: usize },
    /// 读缓冲已满，但仍无法解出完整消息。
    #[error("read buffer of {capacity} bytes is full without a complete frame")]
    BufferOverflow { capacity: usize },
    /// 编解码器自定义错误。
    #[error(transparent)]
    Other(BoxError),
}

impl CodecError {
    /// 稳定错误码，便于日志检索与告警聚合。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "spark.codec.malformed",
            Self::FrameTooLarge { .. } => "spark.codec.frame_too_large",
            Self::BufferOverflow { .. } => "spark.codec.buffer_overflow",
            Self::Other(_) => "spark.codec.other",
        }
    }
}

/// 会话写入接口返回的错误。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 会话处于 CLOSING 或 CLOSED，不再接受写入；阻塞中的生产者在关闭时也会收到该错误。
    #[error("session {id} is closed")]
    Closed { id: u64 },
    /// 非阻塞写入时出站队列已满。
    #[error("outbound queue of session {id} is full")]
    WouldBlock { id: u64 },
    /// 限时写入在等待队列空位时超时。
    #[error("session {id} timed out after {waited:?} waiting for outbound capacity")]
    WriteTimeout { id: u64, waited: Duration },
    /// 编码失败，会话随之关闭。
    #[error("encode failed: {0}")]
    Codec(#[from] CodecError),
}

impl SessionError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "spark.session.closed",
            Self::WouldBlock { .. } => "spark.session.would_block",
            Self::WriteTimeout { .. } => "spark.session.write_timeout",
            Self::Codec(_) => "spark.session.codec",
        }
    }

    /// 调用方稍后重试是否可能成功。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WouldBlock { .. } | Self::WriteTimeout { .. })
    }
}

/// 配置校验或解析失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必须为正数的字段被设置为零。
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },
    /// TOML 解析失败。
    #[error("failed to parse session configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 过滤器或处理器在回调中 panic。
///
/// 引擎捕获 panic 后将其包装为该错误，交给过滤器链的失败回调，会话继续处理后续消息。
#[derive(Debug, Error)]
#[error("handler panicked: {message}")]
pub struct HandlerPanic {
    message: String,
}

impl HandlerPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(text) => *text,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(text) => (*text).to_owned(),
                Err(_) => "non-string panic payload".to_owned(),
            },
        };
        Self { message }
    }

    /// panic 携带的文本。
    pub fn message(&self) -> &str {
        &self.message
    }
}
