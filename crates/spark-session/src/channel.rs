use std::{io, net::SocketAddr, sync::Arc};

use spark_buffer::IoBuffer;

/// 异步 I/O 完成回调。
///
/// 传输层在一次读或写结束后调用对应方法，并把提交时收到的缓冲原样交还。
///
/// # 契约说明（What）
/// - `read_completed`：成功时 `Ok(n)` 表示已有 `n` 个字节追加到缓冲写游标之后，`Ok(0)` 表示对端关闭输入；
/// - `write_completed`：成功时 `Ok(n)` 表示已写出 `n` 个字节，且传输层已对缓冲执行 `advance(n)`，
///   未写完的部分仍留在缓冲中；
/// - 两个方法以 `Arc<Self>` 为接收者，实现方可以把所有权转交给后续提交，而无需额外克隆。
pub trait IoCompletion: Send + Sync + 'static {
    fn read_completed(self: Arc<Self>, buf: IoBuffer, result: io::Result<usize>);

    fn write_completed(self: Arc<Self>, buf: IoBuffer, result: io::Result<usize>);
}

/// 会话引擎与具体反应器之间的边界。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 会话的读解码、合并写与关闭协议不依赖任何具体传输；TCP、TLS、UDP 只需实现该 trait，
///   即可复用同一套会话语义；
/// - 测试可以用内存实现替身，逐字节控制读入与部分写出。
///
/// ## 逻辑 (How)
/// - 缓冲以所有权形式随提交移交给传输层，完成时再随回调交还，避免跨线程共享可变缓冲；
/// - 读：传输层把数据写入 `IoBuffer::spare_mut()` 暴露的空闲区；
/// - 写：传输层从 `IoBuffer` 的未读区间取数据，写出多少就 `advance` 多少。
///
/// ## 契约 (What)
/// - 会话保证任意时刻至多一个未完成的读和一个未完成的写；
/// - `close` 必须幂等；关闭之后提交的操作可以直接以错误完成，也可以被丢弃；
/// - 回调可能在任意线程触发，且回调内部可能再次调用 `submit_*`，实现不得在持锁状态下回调。
pub trait IoChannel: Send + Sync + 'static {
    fn submit_read(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>);

    fn submit_write(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>);

    fn close(&self);

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
