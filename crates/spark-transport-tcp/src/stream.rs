//! 基于 Tokio 字节流的 [`IoChannel`] 实现，TCP 与 TLS 共用。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 会话引擎以“提交操作 + 完成回调”驱动 I/O，而 Tokio 以 `async` 任务驱动，
//!   此模块把前者桥接到后者；
//! - 同一连接的读与写互不阻塞，才能让业务在读回调里写出而不死锁。
//!
//! ## 逻辑 (How)
//! - `tokio::io::split` 拆出读半部与写半部，各由一个任务独占；
//! - 提交操作经无界 `mpsc` 投递给对应任务，会话保证每个方向至多一个在途操作，
//!   因此通道长度实际不超过 1；
//! - 关闭信号经 `watch` 广播，正在进行的读写会被中断并以 `ConnectionAborted` 完成；
//! - 完成回调通过 [`run_completion`] 执行：多线程运行时下包在 `block_in_place` 中，
//!   回调里的阻塞写入（背压）不会占住其他连接赖以推进的工作线程。
//!
//! ## 契约 (What)
//! - 读：把数据读入缓冲的空闲区，`Ok(0)` 表示对端关闭；
//! - 写：一次 `write_buf` 加 `flush`，部分写出由会话继续提交剩余部分；
//! - 写任务退出时执行 `shutdown`，TCP 发送 FIN，TLS 发送 `close_notify`。

use std::{io, net::SocketAddr, sync::Arc};

use spark_session::{IoBuffer, IoChannel, IoCompletion, Session, SessionFactory};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    runtime::{Handle, RuntimeFlavor},
    sync::{mpsc, watch},
};
use tracing::trace;

type Operation = (IoBuffer, Arc<dyn IoCompletion>);

/// 把一条已建立的字节流包装为会话通道。
pub struct StreamChannel {
    reads: mpsc::UnboundedSender<Operation>,
    writes: mpsc::UnboundedSender<Operation>,
    closed: watch::Sender<bool>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl StreamChannel {
    /// 在当前 Tokio 运行时上启动读写任务。
    ///
    /// # Panics
    /// 不在 Tokio 运行时上下文中调用时 panic（由 `tokio::spawn` 触发）。
    pub fn spawn<S>(
        stream: S,
        peer_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (reads, read_ops) = mpsc::unbounded_channel();
        let (writes, write_ops) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(false);
        tokio::spawn(read_loop(reader, read_ops, closed_rx.clone()));
        tokio::spawn(write_loop(writer, write_ops, closed_rx));
        Arc::new(Self {
            reads,
            writes,
            closed,
            peer_addr,
            local_addr,
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl IoChannel for StreamChannel {
    fn submit_read(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>) {
        if let Err(mpsc::error::SendError((buf, completion))) = self.reads.send((buf, completion)) {
            completion.read_completed(buf, Err(io::Error::from(io::ErrorKind::NotConnected)));
        }
    }

    fn submit_write(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>) {
        if let Err(mpsc::error::SendError((buf, completion))) = self.writes.send((buf, completion))
        {
            completion.write_completed(buf, Err(io::Error::from(io::ErrorKind::NotConnected)));
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// 为已建立的字节流启动读写任务，并交给工厂创建会话。
///
/// 会话创建期间的处理器回调同样经 [`run_completion`] 执行。
pub fn open_session<M, S>(
    factory: &SessionFactory<M>,
    stream: S,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
) -> Session<M>
where
    M: 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let channel = StreamChannel::spawn(stream, peer_addr, local_addr);
    run_completion(|| factory.open(channel))
}

/// 执行一次完成回调。
///
/// 多线程运行时下使用 `block_in_place`，其余情况（单线程运行时或非 Tokio 线程）直接调用。
pub fn run_completion<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// 等待关闭信号；发送端被丢弃同样视为关闭。
pub async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
}

async fn read_loop<R>(
    mut reader: R,
    mut ops: mpsc::UnboundedReceiver<Operation>,
    mut closed: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let (mut buf, completion) = tokio::select! {
            op = ops.recv() => match op {
                Some(op) => op,
                None => break,
            },
            _ = wait_closed(&mut closed) => break,
        };
        let mut spare = buf.spare_mut();
        let result = tokio::select! {
            res = reader.read_buf(&mut spare) => res,
            _ = wait_closed(&mut closed) => Err(aborted()),
        };
        trace!(?result, "stream read finished");
        run_completion(move || completion.read_completed(buf, result));
    }
    ops.close();
    while let Ok((buf, completion)) = ops.try_recv() {
        run_completion(move || completion.read_completed(buf, Err(aborted())));
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut ops: mpsc::UnboundedReceiver<Operation>,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let (mut buf, completion) = tokio::select! {
            op = ops.recv() => match op {
                Some(op) => op,
                None => break,
            },
            _ = wait_closed(&mut closed) => break,
        };
        let write = async {
            let written = writer.write_buf(&mut buf).await?;
            writer.flush().await?;
            Ok::<_, io::Error>(written)
        };
        let result = tokio::select! {
            res = write => res,
            _ = wait_closed(&mut closed) => Err(aborted()),
        };
        trace!(?result, "stream write finished");
        run_completion(move || completion.write_completed(buf, result));
    }
    ops.close();
    while let Ok((buf, completion)) = ops.try_recv() {
        run_completion(move || completion.write_completed(buf, Err(aborted())));
    }
    let _ = writer.shutdown().await;
}
