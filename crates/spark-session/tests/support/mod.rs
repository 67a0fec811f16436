//! 会话集成测试共享的替身：内存通道、长度前缀编解码器与记录型处理器。
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::{Condvar, Mutex};
use spark_session::{
    BoxError, Codec, CodecError, Filter, IoBuffer, IoChannel, IoCompletion, Pipeline, Processor,
    Session, SessionConfig, SessionFactory, StateEvent,
};

type Pending = (IoBuffer, Arc<dyn IoCompletion>);

/// 手动驱动的内存通道：读由测试投递，写由测试按任意字节数完成。
#[derive(Default)]
pub struct MockChannel {
    state: Mutex<MockState>,
    submitted: Condvar,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    pending_read: Option<Pending>,
    pending_writes: VecDeque<Pending>,
    written: Vec<u8>,
    write_sizes: Vec<usize>,
    reads_submitted: usize,
    close_calls: usize,
}

impl IoChannel for MockChannel {
    fn submit_read(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>) {
        let mut state = self.state.lock();
        assert!(state.pending_read.is_none(), "同一时刻只允许一个在途读");
        state.reads_submitted += 1;
        state.pending_read = Some((buf, completion));
    }

    fn submit_write(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.write_sizes.push(buf.remaining());
        state.pending_writes.push_back((buf, completion));
        self.submitted.notify_all();
    }

    fn close(&self) {
        self.state.lock().close_calls += 1;
    }
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 把 `data` 作为一次读完成投递给会话；没有在途读时返回 `false`。
    pub fn deliver(&self, data: &[u8]) -> bool {
        let Some((mut buf, completion)) = self.state.lock().pending_read.take() else {
            return false;
        };
        buf.put_slice(data);
        completion.read_completed(buf, Ok(data.len()));
        true
    }

    pub fn deliver_eof(&self) -> bool {
        self.complete_read(Ok(0))
    }

    pub fn fail_read(&self) -> bool {
        self.complete_read(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
    }

    fn complete_read(&self, result: io::Result<usize>) -> bool {
        let Some((buf, completion)) = self.state.lock().pending_read.take() else {
            return false;
        };
        completion.read_completed(buf, result);
        true
    }

    /// 完成队头写操作，最多写出 `limit` 字节；没有在途写时返回 `None`。
    pub fn complete_write(&self, limit: Option<usize>) -> Option<usize> {
        let (buf, completion, written) = {
            let mut state = self.state.lock();
            let (mut buf, completion) = state.pending_writes.pop_front()?;
            let n = limit.map_or(buf.remaining(), |limit| limit.min(buf.remaining()));
            state.written.extend_from_slice(&buf.chunk()[..n]);
            buf.advance(n);
            (buf, completion, n)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        completion.write_completed(buf, Ok(written));
        Some(written)
    }

    /// 反复完成在途写直到没有新的写被提交。
    pub fn complete_all_writes(&self) {
        while self.complete_write(None).is_some() {}
    }

    pub fn fail_write(&self) -> bool {
        let Some((buf, completion)) = self.state.lock().pending_writes.pop_front() else {
            return false;
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        completion.write_completed(buf, Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        true
    }

    /// 等待出现在途写。
    pub fn wait_for_write(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.pending_writes.is_empty() {
            if self.submitted.wait_until(&mut state, deadline).timed_out() {
                return !state.pending_writes.is_empty();
            }
        }
        true
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// 每次提交写时缓冲中的字节数。
    pub fn write_sizes(&self) -> Vec<usize> {
        self.state.lock().write_sizes.clone()
    }

    pub fn pending_writes(&self) -> usize {
        self.state.lock().pending_writes.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn read_armed(&self) -> bool {
        self.state.lock().pending_read.is_some()
    }

    pub fn reads_submitted(&self) -> usize {
        self.state.lock().reads_submitted
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

/// 两字节大端长度前缀 + 负载。
pub struct LengthCodec {
    pub max_frame: usize,
}

impl Default for LengthCodec {
    fn default() -> Self {
        Self { max_frame: 1024 }
    }
}

impl Codec<Vec<u8>> for LengthCodec {
    fn decode(
        &self,
        src: &mut IoBuffer,
        _session: &Session<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        if src.remaining() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([src.chunk()[0], src.chunk()[1]]) as usize;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len,
                limit: self.max_frame,
            });
        }
        if src.remaining() < 2 + len {
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(src.copy_to_bytes(len).to_vec()))
    }

    fn encode(
        &self,
        item: &Vec<u8>,
        dst: &mut BytesMut,
        _session: &Session<Vec<u8>>,
    ) -> Result<(), CodecError> {
        if item.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len: item.len(),
                limit: self.max_frame,
            });
        }
        dst.put_u16(item.len() as u16);
        dst.put_slice(item);
        Ok(())
    }
}

pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

/// 把写出的字节流切回负载序列。
pub fn split_frames(mut bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while bytes.len() >= 2 {
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        frames.push(bytes[2..2 + len].to_vec());
        bytes = &bytes[2 + len..];
    }
    assert!(bytes.is_empty(), "写出的字节流末尾存在残帧");
    frames
}

/// 记录收到的消息与状态事件；负载以 `b"fail"` 开头的消息返回错误，以 `b"panic"` 开头的触发 panic。
#[derive(Default)]
pub struct RecordingProcessor {
    pub messages: Mutex<Vec<Vec<u8>>>,
    pub events: Mutex<Vec<StateEvent>>,
    pub shutdowns: AtomicUsize,
    pub echo: bool,
}

impl RecordingProcessor {
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().clone()
    }

    pub fn events(&self) -> Vec<StateEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: StateEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }
}

impl Processor<Vec<u8>> for RecordingProcessor {
    fn on_message(&self, session: &Session<Vec<u8>>, message: &Vec<u8>) -> Result<(), BoxError> {
        if message.starts_with(b"panic") {
            panic!("processor asked to panic");
        }
        self.messages.lock().push(message.clone());
        if message.starts_with(b"fail") {
            return Err("processor rejected message".into());
        }
        if self.echo {
            session.write(message)?;
        }
        Ok(())
    }

    fn on_state_change(
        &self,
        _session: &Session<Vec<u8>>,
        event: StateEvent,
        _error: Option<&(dyn std::error::Error + 'static)>,
    ) {
        self.events.lock().push(event);
    }

    fn on_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// 记录失败回调收到的消息。
#[derive(Default)]
pub struct FailureRecorder {
    pub failures: Mutex<Vec<(Vec<u8>, String)>>,
}

impl Filter<Vec<u8>> for FailureRecorder {
    fn on_failure(&self, _session: &Session<Vec<u8>>, message: &Vec<u8>, error: &BoxError) {
        self.failures.lock().push((message.clone(), error.to_string()));
    }
}

pub struct Harness {
    pub factory: SessionFactory<Vec<u8>>,
    pub processor: Arc<RecordingProcessor>,
    pub failures: Arc<FailureRecorder>,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_processor(config, RecordingProcessor::default())
    }

    pub fn with_processor(config: SessionConfig, processor: RecordingProcessor) -> Self {
        let processor = Arc::new(processor);
        let failures = Arc::new(FailureRecorder::default());
        let pipeline = Pipeline::with_processor(processor.clone()).shared_filter(failures.clone());
        let factory = SessionFactory::new(config, LengthCodec::default(), pipeline)
            .expect("测试配置必须合法");
        Self {
            factory,
            processor,
            failures,
        }
    }

    pub fn open(&self) -> (Session<Vec<u8>>, Arc<MockChannel>) {
        let channel = MockChannel::new();
        let session = self.factory.open(channel.clone());
        (session, channel)
    }
}

/// 记录经过的消息与失败回调；负载以 `reject` 开头的消息在本过滤器处被拒绝。
#[derive(Default)]
pub struct GateFilter {
    pub reject: Option<&'static [u8]>,
    pub seen: Mutex<Vec<Vec<u8>>>,
    pub failed: Mutex<Vec<Vec<u8>>>,
}

impl GateFilter {
    pub fn rejecting(prefix: &'static [u8]) -> Self {
        Self {
            reject: Some(prefix),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().clone()
    }

    pub fn failed(&self) -> Vec<Vec<u8>> {
        self.failed.lock().clone()
    }
}

impl Filter<Vec<u8>> for GateFilter {
    fn on_message(&self, _session: &Session<Vec<u8>>, message: &Vec<u8>) -> Result<(), BoxError> {
        if self.reject.is_some_and(|prefix| message.starts_with(prefix)) {
            return Err("filter rejected message".into());
        }
        self.seen.lock().push(message.clone());
        Ok(())
    }

    fn on_failure(&self, _session: &Session<Vec<u8>>, message: &Vec<u8>, _error: &BoxError) {
        self.failed.lock().push(message.clone());
    }
}
