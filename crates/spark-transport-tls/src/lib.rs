#![doc = r#"
# spark-transport-tls

## 设计动机（Why）
- **安全入口**：在 `spark-transport-tcp` 之上以 `rustls` 完成握手，握手之后的读写、
  背压与关闭流程与明文 TCP 完全一致；
- **热更新**：依托 `ArcSwap` 在不中断现有会话的情况下替换证书或密码套件配置。

## 核心契约（What）
- [`TlsServer::bind`] 接受连接并在独立任务中握手，超过
  [`TlsServerOptions::handshake_timeout`] 的握手被放弃；
- [`TlsAcceptor::replace_config`] 只影响之后开始的握手；
- [`TlsClient::connect`] 以给定 SNI 完成客户端握手并返回会话；
- 失败以 [`TlsError`] 返回，握手失败可进一步区分安全违规与瞬时故障。

## 风险与考量（Trade-offs）
- 本 crate 不选择 `CryptoProvider`，宿主需自行以 `builder_with_provider`
  构造配置或安装进程级默认 provider。
"#]

mod acceptor;
mod client;
mod config;
mod error;
mod server;

pub use acceptor::TlsAcceptor;
pub use client::TlsClient;
pub use config::{DEFAULT_HANDSHAKE_TIMEOUT, TlsServerOptions};
pub use error::TlsError;
pub use server::TlsServer;
