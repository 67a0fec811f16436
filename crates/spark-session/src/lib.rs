#![doc = r#"
# spark-session

## 设计动机（Why）
- 把“连接上的字节流”变成“有序的业务消息”是所有传输共有的工作：读缓冲管理、
  帧重组、消息分发、有序合并写与关闭协议都不应在 TCP、TLS、UDP 中各写一遍；
- 会话引擎只依赖 [`IoChannel`] 这一反应器边界，传输实现与测试替身都可以接入。

## 核心契约（What）
- **读路径**：每次读完成后解出全部完整消息，逐条交给 [`Filter`] 链与 [`Processor`]；
  单条消息的失败只影响该消息，编解码失败则关闭会话；
- **写路径**：任意线程可并发写，字节按入队顺序到达传输层，任意时刻至多一个在途写，
  小消息在阈值内合并发送；出站队列有界，满时写入方阻塞；
- **生命周期**：`ENABLED → CLOSING → CLOSED`，`SessionClosed` 恰好投递一次。

## 模块结构（How）
- [`config`]：[`SessionConfig`] 与 TOML 加载；
- [`queue`]：有界出站队列 [`OutboundQueue`]；
- `channel` / `codec` / `pipeline`：传输、编解码、业务三侧的 trait 契约；
- `session`：会话句柄、读写路径与关闭协议；
- `factory`：[`SessionFactory`]，负责会话创建顺序与引擎关闭回调。
"#]

mod channel;
mod codec;
pub mod config;
mod error;
mod factory;
mod pipeline;
pub mod queue;
mod session;

pub use channel::{IoChannel, IoCompletion};
pub use codec::Codec;
pub use config::SessionConfig;
pub use error::{BoxError, CodecError, ConfigError, HandlerPanic, SessionError};
pub use factory::SessionFactory;
pub use pipeline::{Attachment, Filter, Pipeline, Processor, StateEvent};
pub use queue::{EnqueueError, EnqueueErrorKind, OutboundQueue};
pub use session::{Session, SessionStatus};

pub use spark_buffer::{BufferPool, IoBuffer, PoolConfig, PoolStats};
