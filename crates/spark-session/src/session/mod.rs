//! 会话句柄与生命周期。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 一个会话绑定一条连接（或一个 UDP 对端），对外只暴露可克隆的句柄，
//!   业务线程、读完成回调与写完成回调都可以并发持有；
//! - 关闭需要两种语义：立即关闭丢弃未发送数据，优雅关闭等出站队列排空后再关。
//!
//! ## 逻辑 (How)
//! - 状态机 `ENABLED → CLOSING → CLOSED` 存放在 `AtomicU8` 中，只允许向后迁移；
//! - 立即关闭用 `swap(CLOSED)` 判定首个关闭者，保证 `SessionClosed` 恰好投递一次；
//! - 写许可是一个 `AtomicBool`，持有者才能提交写操作，见 `write` 子模块；
//! - 读路径与写路径分别位于 `read`、`write` 子模块，本文件只负责状态与收尾。
//!
//! ## 契约 (What)
//! - CLOSING 与 CLOSED 状态下的写入一律返回 [`SessionError::Closed`](crate::SessionError::Closed)；
//! - 优雅关闭只在“状态为 CLOSING、队列为空、且能拿到写许可”三者同时成立时完成。

mod read;
mod write;

use std::{
    any::Any,
    error::Error,
    fmt,
    io,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use spark_buffer::{BufferPool, IoBuffer};
use tracing::{debug, warn};

use crate::{
    Attachment, IoChannel, IoCompletion, SessionConfig, SessionError, StateEvent,
    factory::FactoryShared, queue::OutboundQueue,
};

const ENABLED: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 会话状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// 正常读写。
    Enabled,
    /// 优雅关闭中：拒绝新的写入，继续发送已入队数据。
    Closing,
    /// 已关闭。
    Closed,
}

impl SessionStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            ENABLED => Self::Enabled,
            CLOSING => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// 写许可：同一时刻只有一个执行流能向传输层提交写操作。
struct WritePermit(AtomicBool);

impl WritePermit {
    fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 会话句柄，克隆开销为一次引用计数递增。
pub struct Session<M> {
    inner: Arc<SessionInner<M>>,
}

pub(crate) struct SessionInner<M> {
    id: u64,
    status: AtomicU8,
    permit: WritePermit,
    queue: OutboundQueue,
    channel: Arc<dyn IoChannel>,
    shared: Arc<FactoryShared<M>>,
    attachment: Mutex<Option<Attachment>>,
}

impl<M> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: 'static> Session<M> {
    pub(crate) fn new(channel: Arc<dyn IoChannel>, shared: Arc<FactoryShared<M>>) -> Self {
        let queue = OutboundQueue::new(shared.config.write_queue_capacity);
        Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                status: AtomicU8::new(ENABLED),
                permit: WritePermit(AtomicBool::new(false)),
                queue,
                channel,
                shared,
                attachment: Mutex::new(None),
            }),
        }
    }

    /// 进程内唯一且单调递增的会话编号。
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_raw(self.inner.status.load(Ordering::Acquire))
    }

    /// 会话是否仍接受写入。
    pub fn is_open(&self) -> bool {
        self.status() == SessionStatus::Enabled
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.channel.peer_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.channel.local_addr()
    }

    /// 出站队列中尚未提交给传输层的字节数。
    pub fn outbound_bytes(&self) -> usize {
        self.inner.queue.remaining_bytes()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.shared.config
    }

    /// 会话所属工厂的缓冲池，编码器或业务可用它租借缓冲后交给 [`write_buf`](Self::write_buf)。
    pub fn pool(&self) -> &BufferPool {
        &self.inner.shared.pool
    }

    /// 以新值替换会话附件。
    pub fn set_attachment<T: Any + Send>(&self, value: T) {
        *self.inner.attachment.lock() = Some(Box::new(value));
    }

    pub(crate) fn replace_attachment(&self, attachment: Attachment) {
        *self.inner.attachment.lock() = Some(attachment);
    }

    /// 以可变引用访问类型为 `T` 的附件；附件不存在或类型不符时返回 `None`。
    ///
    /// 闭包在附件锁内执行，不要在其中再次访问同一会话的附件。
    pub fn with_attachment<T: Any + Send, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.inner.attachment.lock();
        slot.as_mut()?.downcast_mut::<T>().map(f)
    }

    /// 取出类型为 `T` 的附件；类型不符时附件保持原样。
    pub fn take_attachment<T: Any + Send>(&self) -> Option<T> {
        let mut slot = self.inner.attachment.lock();
        match slot.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    /// 立即关闭，丢弃尚未发送的数据。
    pub fn close(&self) {
        self.close_with(true);
    }

    /// 关闭会话。
    ///
    /// - `immediate == true`：立即关闭传输并丢弃出站队列；
    /// - `immediate == false`：进入 CLOSING，待出站队列排空且无在途写后再关闭。
    pub fn close_with(&self, immediate: bool) {
        if immediate {
            self.close_now();
            return;
        }
        match self.inner.status.compare_exchange(
            ENABLED,
            CLOSING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!(
                    session.id = self.id(),
                    pending = self.outbound_bytes(),
                    "session closing"
                );
                self.notify(StateEvent::SessionClosing, None);
            }
            Err(CLOSED) => return,
            Err(_) => {}
        }
        self.try_finish_close();
    }

    fn close_now(&self) {
        if self.inner.status.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        self.inner.channel.close();
        let discarded = self.inner.queue.close();
        debug!(session.id = self.id(), discarded, "session closed");
        self.notify(StateEvent::SessionClosed, None);
    }

    /// 优雅关闭的收尾检查，写路径每次交还许可后都会调用。
    fn try_finish_close(&self) {
        if self.status() != SessionStatus::Closing || !self.inner.queue.is_empty() {
            return;
        }
        if !self.inner.permit.try_acquire() {
            return;
        }
        if self.inner.queue.is_empty() {
            self.close_now();
            self.inner.permit.release();
        } else {
            self.flush(None);
        }
    }

    /// 提交首个读操作。
    pub(crate) fn start(&self) {
        if self.status() == SessionStatus::Closed {
            return;
        }
        let buf = self.pool().lease(self.config().read_buffer_size);
        self.inner.channel.submit_read(buf, self.completion());
    }

    pub(crate) fn notify(&self, event: StateEvent, error: Option<&(dyn Error + 'static)>) {
        let processor = self.inner.shared.pipeline.processor();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            processor.on_state_change(self, event, error)
        }));
        if outcome.is_err() {
            warn!(session.id = self.id(), ?event, "state handler panicked");
        }
    }

    fn completion(&self) -> Arc<dyn IoCompletion> {
        Arc::clone(&self.inner) as Arc<dyn IoCompletion>
    }

    fn closed_error(&self) -> SessionError {
        SessionError::Closed { id: self.id() }
    }
}

impl<M: 'static> IoCompletion for SessionInner<M> {
    fn read_completed(self: Arc<Self>, buf: IoBuffer, result: io::Result<usize>) {
        Session { inner: self }.on_read_completed(buf, result);
    }

    fn write_completed(self: Arc<Self>, buf: IoBuffer, result: io::Result<usize>) {
        Session { inner: self }.on_write_completed(buf, result);
    }
}

impl<M> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field(
                "status",
                &SessionStatus::from_raw(self.inner.status.load(Ordering::Acquire)),
            )
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}
