use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use spark_buffer::IoBuffer;
use thiserror::Error;

/// 入队失败的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueErrorKind {
    /// 队列已关闭。
    Closed,
    /// 非阻塞入队时队列已满。
    Full,
    /// 限时入队超时。
    TimedOut,
}

/// 入队失败，携带未能入队的缓冲以便调用方归还缓冲池。
#[derive(Debug, Error)]
#[error("outbound enqueue failed: {kind:?}")]
pub struct EnqueueError {
    kind: EnqueueErrorKind,
    buf: BytesMut,
}

impl EnqueueError {
    pub fn kind(&self) -> EnqueueErrorKind {
        self.kind
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// 单会话的有界出站缓冲队列。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 业务线程产生待发送字节的速度可能远高于网络写出速度，有界队列把压力反馈给写入方；
/// - 写路径在一次系统调用中合并多个小缓冲，需要在不出队的前提下估算可合并的总字节数。
///
/// ## 逻辑 (How)
/// - 一把 `parking_lot::Mutex` 保护 `VecDeque` 与累计字节数，配合 `not_full` / `not_empty`
///   两个条件变量实现阻塞入队与阻塞出队；
/// - 每移除一个缓冲唤醒一个等待空位的生产者，每加入一个缓冲唤醒一个等待数据的消费者；
/// - [`close`](Self::close) 丢弃剩余缓冲并唤醒全部等待者，之后所有入队都以 `Closed` 失败。
///
/// ## 契约 (What)
/// - `len() <= capacity()` 恒成立；
/// - `remaining_bytes()` 恒等于队列中各缓冲长度之和；
/// - 出队顺序与入队顺序一致；
/// - 调用方不应入队空缓冲，合并估算依赖“每个缓冲至少一个字节”。
///
/// ## 注意事项 (Trade-offs)
/// - 单锁设计让生产者与写路径在同一把锁上竞争，换来的是计数与内容严格一致，
///   且临界区内只有指针移动与加减法。
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<BytesMut>,
    remaining: usize,
    closed: bool,
}

impl QueueState {
    fn push(&mut self, buf: BytesMut) {
        self.remaining += buf.len();
        self.items.push_back(buf);
    }

    fn pop(&mut self) -> Option<BytesMut> {
        let buf = self.items.pop_front()?;
        self.remaining -= buf.len();
        Some(buf)
    }
}

impl OutboundQueue {
    /// 创建容量为 `capacity` 个缓冲的队列，容量至少为 1。
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                remaining: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 阻塞入队，直到出现空位或队列关闭。
    pub fn enqueue(&self, buf: BytesMut) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        while !state.closed && state.items.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        self.push_locked(&mut state, buf)
    }

    /// 限时入队，超时返回 [`EnqueueErrorKind::TimedOut`]。
    pub fn enqueue_timeout(&self, buf: BytesMut, timeout: Duration) -> Result<(), EnqueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.closed && state.items.len() >= self.capacity {
            if self.not_full.wait_until(&mut state, deadline).timed_out()
                && !state.closed
                && state.items.len() >= self.capacity
            {
                return Err(EnqueueError {
                    kind: EnqueueErrorKind::TimedOut,
                    buf,
                });
            }
        }
        self.push_locked(&mut state, buf)
    }

    /// 非阻塞入队，队列满时返回 [`EnqueueErrorKind::Full`]。
    pub fn try_enqueue(&self, buf: BytesMut) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        if !state.closed && state.items.len() >= self.capacity {
            return Err(EnqueueError {
                kind: EnqueueErrorKind::Full,
                buf,
            });
        }
        self.push_locked(&mut state, buf)
    }

    fn push_locked(&self, state: &mut QueueState, buf: BytesMut) -> Result<(), EnqueueError> {
        if state.closed {
            return Err(EnqueueError {
                kind: EnqueueErrorKind::Closed,
                buf,
            });
        }
        state.push(buf);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 非阻塞地取出队头缓冲。
    pub fn dequeue_one(&self) -> Option<BytesMut> {
        let mut state = self.state.lock();
        let buf = state.pop()?;
        self.not_full.notify_one();
        Some(buf)
    }

    /// 阻塞出队，直到有数据或队列关闭；关闭后返回 `None`。
    pub fn take(&self) -> Option<BytesMut> {
        let mut state = self.state.lock();
        while !state.closed && state.items.is_empty() {
            self.not_empty.wait(&mut state);
        }
        let buf = state.pop()?;
        self.not_full.notify_one();
        Some(buf)
    }

    /// 将队头开始、能完整放入 `dst` 剩余空间的缓冲依次拷入，返回拷贝的字节数。
    ///
    /// 被拷贝完的缓冲交给 `recycle`，通常是归还缓冲池。
    pub fn drain_into(&self, dst: &mut IoBuffer, mut recycle: impl FnMut(BytesMut)) -> usize {
        let mut drained = Vec::new();
        let mut copied = 0;
        {
            let mut state = self.state.lock();
            while let Some(head) = state.items.front() {
                if head.len() > dst.writable() {
                    break;
                }
                let Some(buf) = state.pop() else { break };
                dst.put_slice(&buf);
                copied += buf.len();
                self.not_full.notify_one();
                drained.push(buf);
            }
        }
        drained.into_iter().for_each(&mut recycle);
        copied
    }

    /// 队头缓冲的字节数，队列为空时返回 `None`。
    pub fn peek_remaining(&self) -> Option<usize> {
        self.state.lock().items.front().map(BytesMut::len)
    }

    /// 估算一次合并写应当取用的字节数。
    ///
    /// - 队列为空返回 0；
    /// - 全部字节不超过 `limit`，或队列只有一个缓冲时，返回全部字节；
    /// - 否则返回从队头开始、总和不超过 `limit` 的最长前缀之和；若队头单个缓冲已超过
    ///   `limit`，返回队头的大小，保证写路径总能推进。
    pub fn peek_aggregate_size(&self, limit: usize) -> usize {
        let state = self.state.lock();
        let mut sizes = state.items.iter().map(BytesMut::len);
        let Some(first) = sizes.next() else {
            return 0;
        };
        if state.remaining <= limit || state.items.len() == 1 {
            return state.remaining;
        }
        let mut total = first;
        for size in sizes {
            if total + size > limit {
                break;
            }
            total += size;
        }
        total
    }

    /// 队列中全部缓冲的字节总数。
    pub fn remaining_bytes(&self) -> usize {
        self.state.lock().remaining
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 关闭队列：丢弃剩余缓冲并唤醒所有等待者，返回被丢弃的缓冲数。
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            state.remaining = 0;
            let discarded = state.items.len();
            state.items.clear();
            discarded
        };
        self.not_full.notify_all();
        self.not_empty.notify_all();
        discarded
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OutboundQueue")
            .field("len", &state.items.len())
            .field("remaining", &state.remaining)
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use super::*;

    fn bytes_of(len: usize) -> BytesMut {
        BytesMut::from(&vec![0xAB; len][..])
    }

    /// 容量 4 的队列放入第 5 个缓冲时必须阻塞，直到一次出队释放空位。
    #[test]
    fn fifth_enqueue_blocks_until_dequeue() {
        let queue = Arc::new(OutboundQueue::new(4));
        for _ in 0..4 {
            queue.enqueue(bytes_of(10)).expect("未满时入队必须成功");
        }

        let finished = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                queue.enqueue(bytes_of(10)).expect("出队后入队必须成功");
                finished.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!finished.load(Ordering::SeqCst), "队列已满时生产者必须阻塞");

        assert_eq!(queue.dequeue_one().map(|b| b.len()), Some(10));
        producer.join().expect("生产者线程不应 panic");
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.remaining_bytes(), 40);
    }

    #[test]
    fn aggregate_size_walks_prefix_under_limit() {
        let queue = OutboundQueue::new(16);
        assert_eq!(queue.peek_aggregate_size(100), 0);

        for len in [30, 30, 30, 30] {
            queue.enqueue(bytes_of(len)).unwrap();
        }
        assert_eq!(queue.peek_aggregate_size(200), 120, "总量未超限时返回全部字节");
        assert_eq!(queue.peek_aggregate_size(100), 90);
        assert_eq!(queue.peek_aggregate_size(60), 60);
    }

    #[test]
    fn aggregate_size_of_oversized_head_is_head_alone() {
        let queue = OutboundQueue::new(16);
        queue.enqueue(bytes_of(500)).unwrap();
        assert_eq!(queue.peek_aggregate_size(100), 500, "单个缓冲时返回其全部字节");

        queue.enqueue(bytes_of(20)).unwrap();
        assert_eq!(queue.peek_aggregate_size(100), 500, "队头超限时仍须整块发送队头");
    }

    #[test]
    fn drain_stops_at_first_buffer_that_does_not_fit() {
        let queue = OutboundQueue::new(16);
        for len in [40, 40, 40, 30, 10] {
            queue.enqueue(bytes_of(len)).unwrap();
        }
        let mut dst = IoBuffer::with_capacity(150);
        let mut recycled = 0;
        let copied = queue.drain_into(&mut dst, |_| recycled += 1);

        assert_eq!(copied, 120);
        assert_eq!(recycled, 3);
        assert_eq!(queue.peek_remaining(), Some(30));
        assert_eq!(queue.remaining_bytes(), 40);
    }

    #[test]
    fn timed_and_non_blocking_enqueue_report_full_queue() {
        let queue = OutboundQueue::new(1);
        queue.enqueue(bytes_of(1)).unwrap();

        let err = queue.try_enqueue(bytes_of(2)).unwrap_err();
        assert_eq!(err.kind(), EnqueueErrorKind::Full);
        assert_eq!(err.into_inner().len(), 2, "失败时必须交还原缓冲");

        let err = queue
            .enqueue_timeout(bytes_of(3), Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind(), EnqueueErrorKind::TimedOut);
    }

    #[test]
    fn close_wakes_blocked_producers_and_consumers() {
        let queue = Arc::new(OutboundQueue::new(1));
        queue.enqueue(bytes_of(1)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(bytes_of(1)).map_err(|err| err.kind()))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.close(), 1);
        assert_eq!(producer.join().unwrap(), Err(EnqueueErrorKind::Closed));

        assert!(queue.take().is_none(), "关闭后阻塞出队立即返回");
        assert_eq!(queue.remaining_bytes(), 0);
    }

    #[test]
    fn concurrent_producers_keep_byte_count_consistent() {
        let queue = Arc::new(OutboundQueue::new(8));
        let producers: Vec<_> = (1..=4)
            .map(|len| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..200 {
                        queue.enqueue(bytes_of(len)).unwrap();
                    }
                })
            })
            .collect();

        let mut total = 0;
        let mut seen = 0;
        while seen < 800 {
            if let Some(buf) = queue.take() {
                total += buf.len();
                seen += 1;
            }
            let state = queue.state.lock();
            let recount: usize = state.items.iter().map(BytesMut::len).sum();
            assert_eq!(state.remaining, recount, "累计字节数必须与队列内容一致");
            assert!(state.items.len() <= queue.capacity());
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(total, 200 * (1 + 2 + 3 + 4));
        assert_eq!(queue.remaining_bytes(), 0);
    }

    /// 写路径交替使用 `dequeue_one` 与 `drain_into` 取数据，生产者同时入队，计数不得漂移。
    #[test]
    fn flush_side_removal_keeps_byte_count_consistent() {
        let queue = Arc::new(OutboundQueue::new(8));
        let done = Arc::new(AtomicBool::new(false));
        let producers: Vec<_> = (1..=3)
            .map(|len| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..300 {
                        queue.enqueue(bytes_of(len * 5)).unwrap();
                    }
                })
            })
            .collect();

        let flusher = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut total = 0;
                let mut round = 0usize;
                while !(done.load(Ordering::SeqCst) && queue.is_empty()) {
                    round += 1;
                    if round % 2 == 0 {
                        total += queue.dequeue_one().map_or(0, |buf| buf.len());
                    } else {
                        let mut dst = IoBuffer::with_capacity(32);
                        total += queue.drain_into(&mut dst, drop);
                    }
                    let state = queue.state.lock();
                    let recount: usize = state.items.iter().map(BytesMut::len).sum();
                    assert_eq!(state.remaining, recount, "累计字节数必须与队列内容一致");
                }
                total
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert_eq!(flusher.join().unwrap(), 300 * 5 * (1 + 2 + 3));
        assert_eq!(queue.remaining_bytes(), 0);
    }
}
