use bytes::{Buf, BufMut, BytesMut};
use spark_session::{Codec, CodecError, IoBuffer, Session};

const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// 基于换行符的文本编解码器。
///
/// # 行为概览（How）
/// - `decode`：在未读区间查找首个 `\n`，切出该行并去掉可选的 `\r`，再校验 UTF-8；
/// - `encode`：校验长度与内容后写入文本并追加 `\n`。
///
/// # 契约说明（What）
/// - 行长度（不含行尾符）不得超过 `max_length`，解码与编码两侧都会检查；
/// - 尚未出现换行符但未读字节已超过 `max_length + 2` 时立即报错，
///   不必等读缓冲被填满；
/// - 无状态，可在所有会话之间共享。
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
}

impl LineCodec {
    /// 默认单行上限，与会话默认读缓冲一致。
    pub const DEFAULT_MAX_LENGTH: usize = 510;

    /// 以指定单行上限构造。
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// 单行长度上限。
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn too_large(&self, len: usize) -> CodecError {
        CodecError::FrameTooLarge {
            len,
            limit: self.max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LENGTH)
    }
}

impl Codec<String> for LineCodec {
    fn decode(
        &self,
        src: &mut IoBuffer,
        _session: &Session<String>,
    ) -> Result<Option<String>, CodecError> {
        let chunk = src.chunk();
        let Some(pos) = chunk.iter().position(|byte| *byte == NEWLINE) else {
            // 行尾符最多占两个字节，超出说明这一行注定超长。
            if chunk.len() > self.max_length + 2 {
                return Err(self.too_large(chunk.len()));
            }
            return Ok(None);
        };

        let line_end = match chunk[..pos].last() {
            Some(&CARRIAGE_RETURN) => pos - 1,
            _ => pos,
        };
        if line_end > self.max_length {
            return Err(self.too_large(line_end));
        }
        let text = std::str::from_utf8(&chunk[..line_end])
            .map_err(|err| CodecError::Malformed(format!("line is not valid UTF-8: {err}")))?
            .to_owned();
        src.advance(pos + 1);
        Ok(Some(text))
    }

    fn encode(
        &self,
        item: &String,
        dst: &mut BytesMut,
        _session: &Session<String>,
    ) -> Result<(), CodecError> {
        if item.len() > self.max_length {
            return Err(self.too_large(item.len()));
        }
        if item.as_bytes().contains(&NEWLINE) {
            return Err(CodecError::Malformed(
                "line payload must not contain a newline".to_owned(),
            ));
        }
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(NEWLINE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spark_session::{
        BoxError, IoChannel, IoCompletion, Pipeline, Processor, SessionConfig, SessionFactory,
    };

    use super::*;

    struct NullChannel;

    impl IoChannel for NullChannel {
        fn submit_read(&self, _buf: IoBuffer, _completion: Arc<dyn IoCompletion>) {}

        fn submit_write(&self, _buf: IoBuffer, _completion: Arc<dyn IoCompletion>) {}

        fn close(&self) {}
    }

    struct Ignore;

    impl Processor<String> for Ignore {
        fn on_message(&self, _session: &Session<String>, _message: &String) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn session() -> Session<String> {
        SessionFactory::new(SessionConfig::default(), LineCodec::default(), Pipeline::new(Ignore))
            .expect("默认配置合法")
            .open(Arc::new(NullChannel))
    }

    fn buffer(bytes: &[u8]) -> IoBuffer {
        let mut buf = IoBuffer::with_capacity(64);
        buf.put_slice(bytes);
        buf
    }

    #[test]
    fn decodes_lines_and_strips_carriage_return() {
        let session = session();
        let codec = LineCodec::default();
        let mut src = buffer(b"hello\r\nworld\npartial");

        assert_eq!(codec.decode(&mut src, &session).unwrap().as_deref(), Some("hello"));
        assert_eq!(codec.decode(&mut src, &session).unwrap().as_deref(), Some("world"));
        assert_eq!(codec.decode(&mut src, &session).unwrap(), None);
        assert_eq!(src.chunk(), b"partial", "不完整的行不得被消费");
    }

    #[test]
    fn overlong_line_fails_before_newline_arrives() {
        let session = session();
        let codec = LineCodec::new(4);

        let mut src = buffer(b"abcdefg");
        assert!(matches!(
            codec.decode(&mut src, &session),
            Err(CodecError::FrameTooLarge { limit: 4, .. })
        ));

        let mut src = buffer(b"abcde\n");
        assert!(matches!(
            codec.decode(&mut src, &session),
            Err(CodecError::FrameTooLarge { len: 5, .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let session = session();
        let mut src = buffer(&[0xFF, 0xFE, b'\n']);
        assert!(matches!(
            LineCodec::default().decode(&mut src, &session),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn encode_appends_newline_and_rejects_embedded_newline() {
        let session = session();
        let codec = LineCodec::default();
        let mut dst = BytesMut::new();

        codec.encode(&"ping".to_owned(), &mut dst, &session).unwrap();
        assert_eq!(&dst[..], b"ping\n");

        assert!(matches!(
            codec.encode(&"a\nb".to_owned(), &mut dst, &session),
            Err(CodecError::Malformed(_))
        ));
    }
}
