use std::{
    any::Any,
    error::Error,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::warn;

use crate::{BoxError, HandlerPanic, Session};

/// 会话附件：处理器可为每个会话挂载任意类型的状态。
pub type Attachment = Box<dyn Any + Send>;

/// 会话状态事件。
///
/// 除 `SessionClosed` 在每个会话上恰好出现一次外，其余事件按发生次数投递。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateEvent {
    /// 会话已创建，首个读操作尚未提交。
    NewSession,
    /// 对端关闭了输入方向。
    InputShutdown,
    /// 读操作失败。
    InputError,
    /// 写操作失败。
    OutputError,
    /// 解码失败或读缓冲溢出。
    DecodeError,
    /// 编码失败。
    EncodeError,
    /// 进入优雅关闭，等待出站队列排空。
    SessionClosing,
    /// 会话已关闭。
    SessionClosed,
}

/// 消息过滤器：在处理器之前观察或拦截每条入站消息。
///
/// - `on_message` 返回错误会中止本条消息的后续过滤器与处理器；
/// - 过滤器或处理器对某条消息失败（含 panic）时，链上每个过滤器的 `on_failure` 都会被调用。
pub trait Filter<M>: Send + Sync + 'static {
    fn on_message(&self, _session: &Session<M>, _message: &M) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_failure(&self, _session: &Session<M>, _message: &M, _error: &BoxError) {}
}

/// 业务处理器。
pub trait Processor<M>: Send + Sync + 'static {
    /// 会话创建时调用，返回值作为会话初始附件。
    fn on_new_session(&self, _session: &Session<M>) -> Option<Attachment> {
        None
    }

    fn on_message(&self, session: &Session<M>, message: &M) -> Result<(), BoxError>;

    fn on_state_change(
        &self,
        _session: &Session<M>,
        _event: StateEvent,
        _error: Option<&(dyn Error + 'static)>,
    ) {
    }

    /// 引擎关闭时调用一次。
    fn on_shutdown(&self) {}
}

/// 过滤器链与处理器的组合，负责把一条消息依次交给它们。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 读路径每解出一条消息就分发一次，单条消息的失败不应中断同一批次中的后续消息，
///   也不应拖垮整个会话。
///
/// ## 逻辑 (How)
/// - 先按注册顺序调用过滤器，再调用处理器，任何一步返回错误即停止本条消息；
/// - 整个分发过程包在 `catch_unwind` 中，panic 被转换为 [`HandlerPanic`]；
/// - 失败统一交给所有过滤器的 `on_failure`，随后返回，读路径继续处理下一条消息。
pub struct Pipeline<M> {
    filters: Vec<Arc<dyn Filter<M>>>,
    processor: Arc<dyn Processor<M>>,
}

impl<M: 'static> Pipeline<M> {
    pub fn new(processor: impl Processor<M>) -> Self {
        Self::with_processor(Arc::new(processor))
    }

    /// 使用已共享的处理器构造，便于宿主在外部保留处理器句柄。
    pub fn with_processor(processor: Arc<dyn Processor<M>>) -> Self {
        Self {
            filters: Vec::new(),
            processor,
        }
    }

    /// 在链尾追加过滤器。
    pub fn filter(mut self, filter: impl Filter<M>) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn shared_filter(mut self, filter: Arc<dyn Filter<M>>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn processor(&self) -> &Arc<dyn Processor<M>> {
        &self.processor
    }

    pub fn filters(&self) -> &[Arc<dyn Filter<M>>] {
        &self.filters
    }

    pub(crate) fn dispatch(&self, session: &Session<M>, message: &M) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(session, message)))
            .unwrap_or_else(|payload| Err(Box::new(HandlerPanic::from_payload(payload)) as BoxError));
        if let Err(error) = outcome {
            warn!(session.id = session.id(), %error, "message handling failed");
            for filter in &self.filters {
                filter.on_failure(session, message, &error);
            }
        }
    }

    fn run(&self, session: &Session<M>, message: &M) -> Result<(), BoxError> {
        for filter in &self.filters {
            filter.on_message(session, message)?;
        }
        self.processor.on_message(session, message)
    }
}

impl<M> std::fmt::Debug for Pipeline<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}
