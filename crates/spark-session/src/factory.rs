use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use spark_buffer::BufferPool;
use tracing::{debug, info, warn};

use crate::{Codec, ConfigError, IoChannel, Pipeline, Session, SessionConfig, StateEvent};

pub(crate) struct FactoryShared<M> {
    pub(crate) config: SessionConfig,
    pub(crate) codec: Arc<dyn Codec<M>>,
    pub(crate) pipeline: Pipeline<M>,
    pub(crate) pool: BufferPool,
    shut_down: AtomicBool,
}

/// 会话工厂：持有编解码器、过滤器链、处理器与缓冲池，把传输层交来的通道包装为会话。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 各传输实现只负责建立连接并提供 [`IoChannel`]，会话创建顺序与引擎关闭回调
///   统一在此处完成，保证三种传输的行为一致。
///
/// ## 逻辑 (How)
/// - [`open`](Self::open) 依次执行：分配会话编号 → `Processor::on_new_session`（返回值成为附件）
///   → 投递 `NewSession` → 租借读缓冲并提交首个读；
/// - [`shutdown`](Self::shutdown) 借助 `AtomicBool::swap` 保证 `on_shutdown` 只调用一次。
///
/// ## 契约 (What)
/// - 构造时校验配置，非法配置返回 [`ConfigError`]；
/// - 克隆得到的工厂共享同一缓冲池与处理器。
pub struct SessionFactory<M> {
    shared: Arc<FactoryShared<M>>,
}

impl<M> Clone for SessionFactory<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: 'static> SessionFactory<M> {
    pub fn new(
        config: SessionConfig,
        codec: impl Codec<M>,
        pipeline: Pipeline<M>,
    ) -> Result<Self, ConfigError> {
        let pool = BufferPool::new(config.buffer_pool.clone());
        Self::with_pool(config, codec, pipeline, pool)
    }

    /// 使用外部缓冲池构造，多个工厂可以共享同一个池。
    pub fn with_pool(
        config: SessionConfig,
        codec: impl Codec<M>,
        pipeline: Pipeline<M>,
        pool: BufferPool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(FactoryShared {
                config,
                codec: Arc::new(codec),
                pipeline,
                pool,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    /// 为一条已建立的通道创建会话并开始读取。
    pub fn open(&self, channel: Arc<dyn IoChannel>) -> Session<M> {
        let session = Session::new(channel, Arc::clone(&self.shared));
        let processor = self.shared.pipeline.processor();
        match panic::catch_unwind(AssertUnwindSafe(|| processor.on_new_session(&session))) {
            Ok(Some(attachment)) => session.replace_attachment(attachment),
            Ok(None) => {}
            Err(_) => warn!(session.id = session.id(), "new-session handler panicked"),
        }
        session.notify(StateEvent::NewSession, None);
        debug!(
            session.id = session.id(),
            peer = ?session.peer_addr(),
            "session opened"
        );
        session.start();
        session
    }

    /// 通知处理器引擎已停止；重复调用无副作用。
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("session factory shut down");
        self.shared.pipeline.processor().on_shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

impl<M> fmt::Debug for SessionFactory<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.shared.config)
            .field("pipeline", &self.shared.pipeline)
            .finish_non_exhaustive()
    }
}
