#![doc = r#"
# spark-transport-tcp

## 设计动机（Why）
- **定位**：把 Tokio 的 TCP 监听与连接接入 `spark-session` 会话引擎，
  宿主只需提供 [`SessionFactory`](spark_session::SessionFactory) 即可获得完整的服务端或客户端。
- **架构角色**：同时提供通用的字节流反应器 [`StreamChannel`]，TLS 传输在握手完成后复用它。

## 核心契约（What）
- [`TcpServer::bind`] 绑定并开始接受连接，[`TcpServer::shutdown`] 停止接受、
  优雅关闭在线会话并调用工厂的 `shutdown`；
- [`TcpClient::connect`] 建立出站连接并返回会话；
- 所有失败以 [`TcpError`] 返回，附带稳定错误码（`spark.transport.tcp.*`）与可重试判定。

## 实现策略（How）
- 每条连接拆分为读任务与写任务，二者经 `mpsc` 接收会话提交的操作；
- 完成回调在多线程运行时下经 `block_in_place` 执行，写入背压不会阻塞运行时的其他任务。

## 风险与考量（Trade-offs）
- 必须在 Tokio 多线程运行时中使用才能获得上述背压隔离；单线程运行时下，
  在回调中阻塞写入可能造成死锁，应改用 `try_write` 或 `write_timeout`。
"#]

mod client;
mod config;
pub mod error;
mod registry;
mod server;
mod stream;

pub use client::TcpClient;
pub use config::TcpSocketConfig;
pub use error::{OperationKind, TcpError, is_retryable_io};
pub use registry::SessionRegistry;
pub use server::TcpServer;
pub use stream::{StreamChannel, open_session, run_completion, wait_closed};
