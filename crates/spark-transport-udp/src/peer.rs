use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use spark_session::{IoBuffer, IoChannel, IoCompletion};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::warn;

type Operation = (IoBuffer, Arc<dyn IoCompletion>);

/// 发送任务接收的写操作：目标地址、待发送缓冲与完成回调。
pub(crate) type SendOperation = (SocketAddr, IoBuffer, Arc<dyn IoCompletion>);

/// 端点按对端地址索引的通道表。
pub(crate) type PeerTable = DashMap<SocketAddr, Arc<PeerChannel>>;

/// 单个对端的 [`IoChannel`]。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 一个 UDP 套接字服务所有对端，接收任务只能把报文“推”给对端，
///   而会话以“提交读 → 完成回调”的方式“拉”数据，两者之间需要一个暂存区。
///
/// ## 逻辑 (How)
/// - 有挂起读时，报文直接拷入读缓冲，完成回调在阻塞线程池上执行；
/// - 没有挂起读时，报文进入有界暂存队列，下一次 `submit_read` 立即从队首取用；
/// - 读缓冲放不下整个报文时，剩余部分放回队首，会话把报文序列视为连续字节流；
/// - 写操作转交端点唯一的发送任务，以 `send_to` 发往本对端；
/// - 完成回调总是在释放内部锁之后执行，回调内再次 `submit_read` 不会死锁。
///
/// ## 契约 (What)
/// - `close` 幂等：完成挂起读（`ConnectionAborted`），清空暂存，并从端点通道表中移除自身；
/// - 关闭后到达的报文被丢弃。
pub(crate) struct PeerChannel {
    peer: SocketAddr,
    local: Option<SocketAddr>,
    backlog_limit: usize,
    sender: mpsc::UnboundedSender<SendOperation>,
    table: Weak<PeerTable>,
    state: Mutex<PeerState>,
}

#[derive(Default)]
struct PeerState {
    pending_read: Option<Operation>,
    backlog: VecDeque<Bytes>,
    closed: bool,
}

impl PeerChannel {
    pub(crate) fn new(
        peer: SocketAddr,
        local: Option<SocketAddr>,
        backlog_limit: usize,
        sender: mpsc::UnboundedSender<SendOperation>,
        table: Weak<PeerTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            local,
            backlog_limit,
            sender,
            table,
            state: Mutex::new(PeerState::default()),
        })
    }

    /// 投递一个报文；返回 `false` 表示报文被丢弃。
    pub(crate) fn deliver(&self, datagram: Bytes) -> bool {
        let ready = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            match state.pending_read.take() {
                Some((mut buf, completion)) => {
                    let filled = fill(&mut buf, datagram, &mut state.backlog);
                    (buf, completion, filled)
                }
                None if state.backlog.len() >= self.backlog_limit => {
                    drop(state);
                    warn!(
                        peer = %self.peer,
                        limit = self.backlog_limit,
                        "udp peer backlog full, datagram dropped"
                    );
                    return false;
                }
                None => {
                    state.backlog.push_back(datagram);
                    return true;
                }
            }
        };
        let (buf, completion, filled) = ready;
        hand_off(move || completion.read_completed(buf, Ok(filled)));
        true
    }

    #[cfg(test)]
    fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }
}

/// 在阻塞线程池上执行接收任务触发的读完成。
///
/// 解码与分发可能因出站队列已满而阻塞，放在接收任务上会让所有对端一起停止收包；
/// 会话对每个对端至多挂起一个读，因此同一对端的完成仍按到达顺序执行。
/// 不在 Tokio 运行时中时直接调用。
fn hand_off(completion: impl FnOnce() + Send + 'static) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(completion);
        }
        Err(_) => completion(),
    }
}

/// 把报文拷入读缓冲，放不下的部分退回暂存队首。
fn fill(buf: &mut IoBuffer, datagram: Bytes, backlog: &mut VecDeque<Bytes>) -> usize {
    let filled = buf.writable().min(datagram.len());
    buf.put_slice(&datagram[..filled]);
    if filled < datagram.len() {
        backlog.push_front(datagram.slice(filled..));
    }
    filled
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "udp peer closed")
}

impl IoChannel for PeerChannel {
    fn submit_read(&self, mut buf: IoBuffer, completion: Arc<dyn IoCompletion>) {
        let result = {
            let mut state = self.state.lock();
            if state.closed {
                Err(aborted())
            } else if let Some(datagram) = state.backlog.pop_front() {
                Ok(fill(&mut buf, datagram, &mut state.backlog))
            } else {
                state.pending_read = Some((buf, completion));
                return;
            }
        };
        completion.read_completed(buf, result);
    }

    fn submit_write(&self, buf: IoBuffer, completion: Arc<dyn IoCompletion>) {
        if let Err(mpsc::error::SendError((_, buf, completion))) =
            self.sender.send((self.peer, buf, completion))
        {
            completion.write_completed(buf, Err(io::Error::from(io::ErrorKind::NotConnected)));
        }
    }

    fn close(&self) {
        let pending = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.backlog.clear();
            state.pending_read.take()
        };
        if let Some(table) = self.table.upgrade() {
            table.remove_if(&self.peer, |_, channel| std::ptr::eq(channel.as_ref(), self));
        }
        if let Some((buf, completion)) = pending {
            completion.read_completed(buf, Err(aborted()));
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}
