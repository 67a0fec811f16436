use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use spin::Mutex;

use crate::IoBuffer;

/// 缓冲池配置。
///
/// - `slot_size`：池化槽位的字节容量，超出该容量的租借直接走堆分配且不回收；
/// - `max_slots`：自由链表最多缓存的槽位数，超出部分在归还时直接释放。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub slot_size: usize,
    pub max_slots: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slot_size: 4 * 1024,
            max_slots: 1024,
        }
    }
}

/// 缓冲池统计快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 自由链表中缓存的槽位数。
    pub free_slots: usize,
    /// 命中自由链表的租借次数。
    pub hits: u64,
    /// 未命中（链表为空或锁竞争）而新分配的次数。
    pub misses: u64,
    /// 请求容量超过槽位、直接分配的次数。
    pub oversize: u64,
    /// 成功回到自由链表的归还次数。
    pub recycled: u64,
    /// 因尺寸不符、链表已满或锁竞争而丢弃的归还次数。
    pub discarded: u64,
}

/// 跨会话共享的定长槽位缓冲池。
///
/// # 模块角色（Why）
/// - 为会话读缓冲、合并写缓冲与编码输出缓冲提供统一来源，削减逐次分配；
/// - 池在所有会话之间共享，因此必须线程安全，且不能成为跨会话的全局串行点。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表；
/// - 租借与归还都只做 `try_lock`：拿不到锁时租借退化为新分配、归还退化为直接释放，
///   两个方向都不会让调用线程等待；
/// - 归还时先 `clear`，再借助 `BytesMut::try_reclaim` 找回被 `advance` 消耗掉的前缀容量，
///   仍不足一个槽位的缓冲不会进入链表。
///
/// # 契约说明（What）
/// - [`acquire`](Self::acquire) 返回空的 `BytesMut`，其容量至少为 `min_capacity`；
/// - [`release`](Self::release) 可以接收任何来源的 `BytesMut`，不合格的直接丢弃；
/// - 克隆得到的句柄共享同一自由链表。
///
/// # 设计权衡（Trade-offs）
/// - 只池化单一尺寸，换取 O(1) 的租借判断；更大的合并写缓冲按需分配后即丢弃。
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl BufferPool {
    /// 按配置创建空池。
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free_list: Mutex::new(Vec::new()),
                config,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// 当前配置。
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// 租借一块空的 `BytesMut`，容量至少为 `min_capacity`。
    pub fn acquire(&self, min_capacity: usize) -> BytesMut {
        let slot_size = self.inner.config.slot_size;
        if min_capacity > slot_size {
            self.inner.metrics.oversize.fetch_add(1, Ordering::Relaxed);
            return BytesMut::with_capacity(min_capacity);
        }

        let reused = self
            .inner
            .free_list
            .try_lock()
            .and_then(|mut list| list.pop());
        match reused {
            Some(buf) => {
                self.inner.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(slot_size)
            }
        }
    }

    /// 租借并包装为逻辑容量为 `capacity` 的 [`IoBuffer`]。
    pub fn lease(&self, capacity: usize) -> IoBuffer {
        IoBuffer::from_storage(self.acquire(capacity), capacity)
    }

    /// 归还存储。
    pub fn release(&self, mut buf: BytesMut) {
        let config = &self.inner.config;
        buf.clear();
        let fits = buf.capacity() >= config.slot_size || buf.try_reclaim(config.slot_size);
        // 过大的缓冲只会在合并写时出现，缓存它们会让池的驻留内存失控。
        if !fits || buf.capacity() > config.slot_size.saturating_mul(2) {
            self.inner.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.inner.free_list.try_lock() {
            Some(mut list) if list.len() < config.max_slots => {
                list.push(buf);
                self.inner.metrics.recycled.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.inner.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// 归还 [`IoBuffer`] 的底层存储。
    pub fn recycle(&self, buf: IoBuffer) {
        self.release(buf.into_storage());
    }

    /// 清空自由链表，返回释放的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        let mut list = self.inner.free_list.lock();
        let reclaimed = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        reclaimed
    }

    /// 读取统计快照。
    pub fn statistics(&self) -> PoolStats {
        let metrics = &self.inner.metrics;
        PoolStats {
            free_slots: self.inner.free_list.lock().len(),
            hits: metrics.hits.load(Ordering::Relaxed),
            misses: metrics.misses.load(Ordering::Relaxed),
            oversize: metrics.oversize.load(Ordering::Relaxed),
            recycled: metrics.recycled.load(Ordering::Relaxed),
            discarded: metrics.discarded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    config: PoolConfig,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct PoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    oversize: AtomicU64,
    recycled: AtomicU64,
    discarded: AtomicU64,
}
