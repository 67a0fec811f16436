//! 写路径：编码入队与单写者合并刷新。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 任意线程都可以写同一会话，但传输层同一时刻只能有一个在途写，否则字节会交错；
//! - 小消息逐条发送会放大系统调用次数，需要在不破坏顺序的前提下合并。
//!
//! ## 逻辑 (How)
//! - 生产者：编码 → 入队（队满时按调用方式阻塞、限时或立即失败）→ 尝试获取写许可，
//!   拿到许可的一方负责刷新；
//! - 刷新：只由许可持有者执行，每轮恰好提交一个写缓冲：
//!   - 上一轮写剩的缓冲仍有数据时，若队头能放进其整理后的空闲空间，则整理并追加队列中
//!     能完整放下的缓冲，否则原样再次提交；
//!   - 没有残留时，按合并阈值估算字节数：恰为单个队头缓冲则直接零拷贝发送，否则租借
//!     新缓冲并拷入；
//!   - 无数据可发时交还许可，并补做一次“队列非空则重新抢许可”的检查，弥补生产者入队
//!     与许可释放之间的竞争窗口；
//! - 写完成：成功则以本次缓冲为残留进入下一轮刷新，失败则发出 `OutputError` 并关闭会话。
//!
//! ## 契约 (What)
//! - 传输层观察到的字节顺序与入队顺序一致；
//! - 任意时刻至多一个在途写；
//! - 每个缓冲在写完后归还缓冲池。

use std::{io, time::Duration};

use bytes::{Buf, BytesMut};
use spark_buffer::IoBuffer;
use tracing::{trace, warn};

use super::{Session, SessionStatus};
use crate::{SessionError, StateEvent, queue::EnqueueErrorKind};

#[derive(Clone, Copy)]
enum Admission {
    Blocking,
    Timeout(Duration),
    NonBlocking,
}

impl<M: 'static> Session<M> {
    /// 编码并写入一条消息；出站队列满时阻塞直到有空位或会话关闭。
    pub fn write(&self, message: &M) -> Result<(), SessionError> {
        let buf = self.encode(message)?;
        self.admit(buf, Admission::Blocking)
    }

    /// 非阻塞写入；出站队列满时返回 [`SessionError::WouldBlock`]。
    pub fn try_write(&self, message: &M) -> Result<(), SessionError> {
        let buf = self.encode(message)?;
        self.admit(buf, Admission::NonBlocking)
    }

    /// 限时写入；在 `timeout` 内等不到空位时返回 [`SessionError::WriteTimeout`]。
    pub fn write_timeout(&self, message: &M, timeout: Duration) -> Result<(), SessionError> {
        let buf = self.encode(message)?;
        self.admit(buf, Admission::Timeout(timeout))
    }

    /// 直接写入已编码的字节，跳过编解码器。空缓冲被忽略。
    pub fn write_buf(&self, buf: BytesMut) -> Result<(), SessionError> {
        self.admit(buf, Admission::Blocking)
    }

    fn encode(&self, message: &M) -> Result<BytesMut, SessionError> {
        if !self.is_open() {
            return Err(self.closed_error());
        }
        let pool = self.pool();
        let mut dst = pool.acquire(0);
        match self.inner.shared.codec.encode(message, &mut dst, self) {
            Ok(()) => Ok(dst),
            Err(err) => {
                pool.release(dst);
                warn!(
                    session.id = self.id(),
                    code = err.code(),
                    error = %err,
                    "encode failed; closing session"
                );
                self.notify(StateEvent::EncodeError, Some(&err));
                self.close();
                Err(err.into())
            }
        }
    }

    fn admit(&self, buf: BytesMut, admission: Admission) -> Result<(), SessionError> {
        let pool = self.pool();
        if !self.is_open() {
            pool.release(buf);
            return Err(self.closed_error());
        }
        if buf.is_empty() {
            pool.release(buf);
            return Ok(());
        }

        let queue = &self.inner.queue;
        let admitted = match admission {
            Admission::Blocking => queue.enqueue(buf),
            Admission::Timeout(timeout) => queue.enqueue_timeout(buf, timeout),
            Admission::NonBlocking => queue.try_enqueue(buf),
        };
        if let Err(err) = admitted {
            let kind = err.kind();
            pool.release(err.into_inner());
            let id = self.id();
            return Err(match (kind, admission) {
                (EnqueueErrorKind::Full, _) => SessionError::WouldBlock { id },
                (EnqueueErrorKind::TimedOut, Admission::Timeout(waited)) => {
                    SessionError::WriteTimeout { id, waited }
                }
                _ => SessionError::Closed { id },
            });
        }

        if self.inner.permit.try_acquire() {
            self.flush(None);
        }
        Ok(())
    }

    /// 许可持有者执行的一轮刷新，最多提交一个写缓冲。
    pub(super) fn flush(&self, mut leftover: Option<IoBuffer>) {
        let pool = self.pool();
        let queue = &self.inner.queue;
        loop {
            if self.status() == SessionStatus::Closed {
                if let Some(buf) = leftover.take() {
                    pool.recycle(buf);
                }
                self.inner.permit.release();
                return;
            }

            let pending = match leftover.take() {
                Some(buf) if buf.has_remaining() => Some(buf),
                Some(buf) => {
                    pool.recycle(buf);
                    None
                }
                None => None,
            };
            let next = match (pending, queue.peek_remaining()) {
                (None, None) => {
                    self.inner.permit.release();
                    if !queue.is_empty() && self.inner.permit.try_acquire() {
                        continue;
                    }
                    self.try_finish_close();
                    return;
                }
                (None, Some(_)) => self.take_merged(),
                (Some(mut buf), Some(head)) if head <= buf.free_after_compact() => {
                    buf.compact();
                    queue.drain_into(&mut buf, |item| pool.release(item));
                    buf
                }
                (Some(buf), _) => buf,
            };
            if !next.has_remaining() {
                leftover = Some(next);
                continue;
            }

            trace!(
                session.id = self.id(),
                bytes = next.remaining(),
                "submitting write"
            );
            self.inner.channel.submit_write(next, self.completion());
            return;
        }
    }

    /// 从队列取出一次合并写的数据。
    fn take_merged(&self) -> IoBuffer {
        let pool = self.pool();
        let queue = &self.inner.queue;
        let size = queue.peek_aggregate_size(self.config().write_merge_threshold);
        if queue.peek_remaining() == Some(size)
            && let Some(single) = queue.dequeue_one()
        {
            return IoBuffer::filled(single);
        }
        let mut merged = pool.lease(size);
        queue.drain_into(&mut merged, |item| pool.release(item));
        merged
    }

    pub(super) fn on_write_completed(&self, buf: IoBuffer, result: io::Result<usize>) {
        let result = match result {
            Ok(0) if buf.has_remaining() => Err(io::Error::from(io::ErrorKind::WriteZero)),
            other => other,
        };
        match result {
            Ok(written) => {
                trace!(session.id = self.id(), written, "write completed");
                self.flush(Some(buf));
            }
            Err(err) => {
                self.pool().recycle(buf);
                if self.status() != SessionStatus::Closed {
                    warn!(session.id = self.id(), error = %err, "write failed");
                    self.notify(StateEvent::OutputError, Some(&err));
                }
                self.close();
                self.inner.permit.release();
            }
        }
    }
}
