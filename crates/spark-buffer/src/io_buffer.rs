use bytes::{Buf, BufMut, BytesMut, buf::Limit};

/// 逻辑容量固定、带读写双游标的 I/O 缓冲。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 会话的读路径需要“追加写入 → 解码消费 → 整理空间”的循环，写路径需要
///   “部分写出 → 保留剩余 → 合并更多数据”的循环，两者都依赖显式的读写游标；
/// - `BytesMut` 在 `advance` 之后会缩减可见容量，无法表达“原始容量内的空闲空间”，
///   因此在其之上补充读游标与逻辑容量。
///
/// ## 逻辑 (How)
/// - `storage.len()` 即写游标，`[read_pos, len)` 为未读区间；
/// - `capacity` 为逻辑上限，构造时保证底层 `BytesMut` 的真实容量不低于该值，
///   追加数据永远不会触发底层扩容；
/// - [`compact`](Self::compact) 将未读区间平移到头部，[`clear`](Self::clear) 复位双游标。
///
/// ## 契约 (What)
/// - `remaining() == filled_len() - position()`；
/// - `filled_len() <= capacity()`，任何写入接口都不会突破该上限；
/// - **前置条件**：调用 [`put_slice`](Self::put_slice) 前需确认 `writable()` 足够，否则 panic，
///   与 `BufMut::put_slice` 的溢出语义一致。
///
/// ## 注意事项 (Trade-offs)
/// - 平移未读数据是一次内存拷贝，调用方应只在确有消费发生时调用 `compact`。
#[derive(Debug)]
pub struct IoBuffer {
    storage: BytesMut,
    read_pos: usize,
    capacity: usize,
}

impl IoBuffer {
    /// 分配一块全新的空缓冲。
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(BytesMut::with_capacity(capacity), capacity)
    }

    /// 复用既有存储构造空缓冲，常用于从缓冲池租借之后。
    ///
    /// 原有内容会被清空；若底层容量不足会补足到 `capacity`。
    pub fn from_storage(mut storage: BytesMut, capacity: usize) -> Self {
        storage.clear();
        if storage.capacity() < capacity {
            storage.reserve(capacity);
        }
        Self {
            storage,
            read_pos: 0,
            capacity,
        }
    }

    /// 将一段已写满的数据包装为缓冲，逻辑容量等于其长度，不发生拷贝。
    pub fn filled(storage: BytesMut) -> Self {
        let capacity = storage.len();
        Self {
            storage,
            read_pos: 0,
            capacity,
        }
    }

    /// 逻辑容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 读游标位置，即本轮已消费的字节数。
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// 写游标位置，即已写入的字节数。
    pub fn filled_len(&self) -> usize {
        self.storage.len()
    }

    /// 写游标之后仍可追加的字节数。
    pub fn writable(&self) -> usize {
        self.capacity - self.storage.len()
    }

    /// 执行 `compact` 之后可追加的字节数。
    pub fn free_after_compact(&self) -> usize {
        self.capacity - self.remaining()
    }

    /// 追加字节。
    ///
    /// # Panics
    /// `src.len() > self.writable()` 时 panic。
    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.writable(),
            "IoBuffer overflow: {} bytes into {} writable",
            src.len(),
            self.writable()
        );
        self.storage.extend_from_slice(src);
    }

    /// 暴露受逻辑容量约束的可写视图，供传输实现直接读入（例如 `AsyncReadExt::read_buf`）。
    ///
    /// 通过该视图写入的字节会直接推进写游标。
    pub fn spare_mut(&mut self) -> Limit<&mut BytesMut> {
        let writable = self.writable();
        (&mut self.storage).limit(writable)
    }

    /// 将未读区间平移到缓冲头部，释放已消费的空间。
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let filled = self.storage.len();
        self.storage.copy_within(self.read_pos..filled, 0);
        self.storage.truncate(filled - self.read_pos);
        self.read_pos = 0;
    }

    /// 复位读写游标，保留底层存储。
    pub fn clear(&mut self) {
        self.storage.clear();
        self.read_pos = 0;
    }

    /// 取回底层存储，用于归还缓冲池。
    pub fn into_storage(self) -> BytesMut {
        self.storage
    }
}

impl Buf for IoBuffer {
    fn remaining(&self) -> usize {
        self.storage.len() - self.read_pos
    }

    fn chunk(&self) -> &[u8] {
        &self.storage[self.read_pos..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past remaining: {} > {}",
            cnt,
            self.remaining()
        );
        self.read_pos += cnt;
    }
}
