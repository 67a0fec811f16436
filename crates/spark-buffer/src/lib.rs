//! `spark-buffer` 为会话引擎提供两类缓冲设施。
//!
//! # 模块定位（Why）
//! - 每条连接的读路径与写路径都需要一块“逻辑容量固定、带读写游标”的缓冲，
//!   以便在不加锁的前提下完成解码、压缩（compact）与合并写；
//! - 大量连接并存时，逐次分配读缓冲与合并写缓冲会放大分配器压力，
//!   因此需要一个跨会话共享、线程安全且尽量不阻塞的缓冲池。
//!
//! # 设计概要（How）
//! - [`IoBuffer`]：以 `BytesMut` 为底层存储，`len()` 即写游标，额外维护读游标与逻辑容量；
//!   读端实现 [`bytes::Buf`]，写端通过 [`IoBuffer::spare_mut`] 暴露受限的 `BufMut` 视图；
//! - [`BufferPool`]：定长槽位的自由链表，租借/归还均走 `try_lock`，
//!   锁竞争时退化为直接分配或直接丢弃，从不阻塞调用线程。
//!
//! # 命名约定（Consistency）
//! - 沿用 `bytes` 的术语：`remaining` 指未读字节数，`chunk` 指当前可读切片。

mod io_buffer;
mod pool;

pub use io_buffer::IoBuffer;
pub use pool::{BufferPool, PoolConfig, PoolStats};
