use std::sync::Arc;

use dashmap::DashMap;
use spark_session::{Session, SessionStatus};
use tracing::debug;

use crate::stream::run_completion;

/// 服务端引擎持有的在线会话表，以会话编号为键。
///
/// 会话关闭后不会主动从表中移除，而是在下一次插入或计数时统一剔除；
/// 克隆得到的句柄共享同一张表。
pub struct SessionRegistry<M> {
    sessions: Arc<DashMap<u64, Session<M>>>,
}

impl<M> Clone for SessionRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<M: 'static> Default for SessionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> SessionRegistry<M> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, session: Session<M>) {
        self.prune();
        self.sessions.insert(session.id(), session);
    }

    /// 尚未完全关闭的会话数。
    pub fn len(&self) -> usize {
        self.prune();
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 对表内全部会话发起优雅关闭并清空表。
    pub fn close_all(&self) {
        let live: Vec<Session<M>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.sessions.clear();
        debug!(sessions = live.len(), "closing live sessions");
        for session in live {
            run_completion(|| session.close_with(false));
        }
    }

    fn prune(&self) {
        self.sessions
            .retain(|_, session| session.status() != SessionStatus::Closed);
    }
}
