#![doc = r#"
# spark-transport-udp

## 模块使命（Why）
- **无连接上的会话**：以对端地址为键，把一个 Tokio `UdpSocket` 拆分为多个
  `spark-session` 会话，业务处理器无需区分 TCP 与 UDP；
- **有界暂存**：UDP 没有流量控制，会话来不及读取的报文进入每个对端独立的有界队列，
  溢出即丢弃并记录告警，而不是无限占用内存。

## 核心契约（What）
- [`UdpEndpoint::bind`] 绑定套接字并启动接收/发送任务；首个报文到达时自动创建会话；
- [`UdpEndpoint::connect`] 主动为某个对端创建会话；
- 会话的一次写对应一个报文，合并写入的上限由 `SessionConfig::write_merge_threshold` 决定，
  应保持在路径 MTU 允许的范围内；
- 读方向把同一对端的报文序列视为连续字节流交给解码器。

## 实现策略（How）
- 接收任务持有一个 `max_datagram_size + 1` 字节的缓冲，以此识别超长报文；
- 发送任务串行执行所有对端的写操作，完成回调与 TCP 一样经 `run_completion` 执行。
"#]

mod config;
mod endpoint;
mod error;
mod peer;

pub use config::UdpOptions;
pub use endpoint::UdpEndpoint;
pub use error::UdpError;
