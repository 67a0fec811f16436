use std::io;

use bytes::Buf;
use spark_buffer::IoBuffer;
use tracing::{debug, trace, warn};

use super::{Session, SessionStatus};
use crate::{CodecError, StateEvent};

impl<M: 'static> Session<M> {
    /// 读完成：解码并分发全部完整消息，整理缓冲后重新提交读。
    ///
    /// # 逻辑 (How)
    /// 1. 会话已关闭时直接归还缓冲，关闭后到达的完成不再产生任何事件；
    /// 2. `Ok(0)` 发出 `InputShutdown`，`Err` 发出 `InputError`，两者都立即关闭会话；
    /// 3. 循环解码直到编解码器返回 `None`，每条消息经过滤器链与处理器；
    /// 4. 整理缓冲：全部消费则复位；部分消费则把残留字节平移到头部；未消费则保持原样；
    /// 5. 整理后仍无可写空间说明单帧超过读缓冲容量，按解码失败关闭会话；
    /// 6. 会话未关闭则以同一缓冲重新提交读。
    pub(super) fn on_read_completed(&self, mut buf: IoBuffer, result: io::Result<usize>) {
        let pool = self.pool();
        if self.status() == SessionStatus::Closed {
            pool.recycle(buf);
            return;
        }
        match result {
            Ok(0) => {
                debug!(session.id = self.id(), "peer shut down input");
                pool.recycle(buf);
                self.notify(StateEvent::InputShutdown, None);
                self.close();
                return;
            }
            Err(err) => {
                warn!(session.id = self.id(), error = %err, "read failed");
                pool.recycle(buf);
                self.notify(StateEvent::InputError, Some(&err));
                self.close();
                return;
            }
            Ok(read) => trace!(session.id = self.id(), read, "read completed"),
        }

        if let Err(err) = self.decode_available(&mut buf) {
            pool.recycle(buf);
            self.fail_decode(err);
            return;
        }
        if self.status() == SessionStatus::Closed {
            pool.recycle(buf);
            return;
        }

        if !buf.has_remaining() {
            buf.clear();
        } else if buf.position() > 0 {
            buf.compact();
        }
        if buf.writable() == 0 {
            let capacity = buf.capacity();
            pool.recycle(buf);
            self.fail_decode(CodecError::BufferOverflow { capacity });
            return;
        }

        self.inner.channel.submit_read(buf, self.completion());
    }

    fn decode_available(&self, buf: &mut IoBuffer) -> Result<(), CodecError> {
        let shared = &self.inner.shared;
        while buf.has_remaining() && self.status() != SessionStatus::Closed {
            match shared.codec.decode(buf, self)? {
                Some(message) => shared.pipeline.dispatch(self, &message),
                None => break,
            }
        }
        Ok(())
    }

    fn fail_decode(&self, err: CodecError) {
        warn!(
            session.id = self.id(),
            code = err.code(),
            error = %err,
            "decode failed; closing session"
        );
        self.notify(StateEvent::DecodeError, Some(&err));
        self.close();
    }
}
