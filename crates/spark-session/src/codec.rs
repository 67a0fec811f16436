use bytes::BytesMut;
use spark_buffer::IoBuffer;

use crate::{CodecError, Session};

/// 消息编解码器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“字节流 ↔ 业务消息”的转换与会话的 I/O 调度解耦，同一引擎可承载任意协议。
///
/// ## 契约 (What)
/// - `decode`：
///   - 从 `src` 的未读区间解出一条消息，并通过 `Buf::advance` 消费对应字节；
///   - 字节不足一帧时返回 `Ok(None)`，且不得消费任何字节；
///   - 返回错误即宣告字节流不可恢复，会话随之关闭。
/// - `encode`：把消息追加到 `dst`，`dst` 来自缓冲池，初始为空。
/// - 编解码器在所有会话之间共享；需要逐会话状态时，请放在会话附件中。
pub trait Codec<M>: Send + Sync + 'static {
    fn decode(&self, src: &mut IoBuffer, session: &Session<M>) -> Result<Option<M>, CodecError>;

    fn encode(&self, item: &M, dst: &mut BytesMut, session: &Session<M>)
    -> Result<(), CodecError>;
}
