use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Buf, Bytes};
use dashmap::mapref::entry::Entry;
use spark_session::{Session, SessionFactory};
use spark_transport_tcp::{SessionRegistry, is_retryable_io, run_completion, wait_closed};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    UdpError, UdpOptions,
    peer::{PeerChannel, PeerTable, SendOperation},
};

const RECV_BACKOFF: Duration = Duration::from_millis(20);

/// UDP 引擎：一个套接字，按对端地址拆分为多个会话。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - UDP 没有连接，但业务仍以“会话”组织状态；把对端地址视作会话键，
///   即可复用与 TCP 完全相同的解码、分发与写合并逻辑。
///
/// ## 逻辑 (How)
/// - 接收任务循环 `recv_from`，按来源地址查找 `PeerChannel`，不存在时创建通道并打开会话；
/// - 发送任务独占写方向，逐个执行会话提交的写操作，一次写对应一个报文；
/// - 对端通道表为 `DashMap`，查找时先克隆出通道句柄再投递，投递期间不持有分片锁，
///   会话在回调中关闭自身（从表中移除）也不会死锁；
/// - 读完成（解码与分发）交给阻塞线程池执行，某个对端的处理器因背压阻塞时，
///   接收任务仍为其他对端收包，该对端后续报文进入其暂存队列。
///
/// ## 契约 (What)
/// - 超过 [`UdpOptions::max_datagram_size`] 的报文被丢弃并告警；
/// - [`connect`](Self::connect) 为尚无会话的对端创建出站会话；
/// - [`shutdown`](Self::shutdown) 停止接收、优雅关闭全部会话并调用工厂的 `shutdown`；
///   发送任务在最后一个对端通道释放后退出。
pub struct UdpEndpoint<M> {
    local_addr: SocketAddr,
    factory: SessionFactory<M>,
    options: UdpOptions,
    peers: Arc<PeerTable>,
    sessions: SessionRegistry<M>,
    sender: mpsc::UnboundedSender<SendOperation>,
    stop: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
}

impl<M: 'static> UdpEndpoint<M> {
    pub async fn bind(
        addr: SocketAddr,
        factory: SessionFactory<M>,
        options: UdpOptions,
    ) -> Result<Self, UdpError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| UdpError::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(UdpError::LocalAddr)?;
        let socket = Arc::new(socket);

        let (sender, send_ops) = mpsc::unbounded_channel();
        tokio::spawn(send_loop(Arc::clone(&socket), send_ops));

        let peers = Arc::new(PeerTable::new());
        let sessions = SessionRegistry::new();
        let (stop, stop_rx) = watch::channel(false);
        let receiver = Receiver {
            local_addr,
            factory: factory.clone(),
            options: options.clone(),
            peers: Arc::clone(&peers),
            sessions: sessions.clone(),
            sender: sender.clone(),
        };
        let recv_task = tokio::spawn(receiver.run(socket, stop_rx));
        info!(addr = %local_addr, "udp endpoint bound");

        Ok(Self {
            local_addr,
            factory,
            options,
            peers,
            sessions,
            sender,
            stop,
            recv_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn factory(&self) -> &SessionFactory<M> {
        &self.factory
    }

    pub fn options(&self) -> &UdpOptions {
        &self.options
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 为 `peer` 打开出站会话。
    ///
    /// 该对端已有会话（包括对端先发来报文而自动创建的会话）时返回
    /// [`UdpError::PeerExists`]。
    pub fn connect(&self, peer: SocketAddr) -> Result<Session<M>, UdpError> {
        if *self.stop.borrow() {
            return Err(UdpError::ShutDown);
        }
        let channel = match self.peers.entry(peer) {
            Entry::Occupied(_) => return Err(UdpError::PeerExists { peer }),
            Entry::Vacant(entry) => {
                let channel = PeerChannel::new(
                    peer,
                    Some(self.local_addr),
                    self.options.peer_backlog(),
                    self.sender.clone(),
                    Arc::downgrade(&self.peers),
                );
                entry.insert(Arc::clone(&channel));
                channel
            }
        };
        let session = run_completion(|| self.factory.open(channel));
        self.sessions.insert(session.clone());
        debug!(%peer, session.id = session.id(), "udp session connected");
        Ok(session)
    }

    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        if let Err(err) = self.recv_task.await {
            warn!(error = %err, "udp receive task ended abnormally");
        }
        self.sessions.close_all();
        run_completion(|| self.factory.shutdown());
        info!(addr = %self.local_addr, peers = self.peers.len(), "udp endpoint shut down");
    }
}

/// 接收任务持有的状态。
struct Receiver<M> {
    local_addr: SocketAddr,
    factory: SessionFactory<M>,
    options: UdpOptions,
    peers: Arc<PeerTable>,
    sessions: SessionRegistry<M>,
    sender: mpsc::UnboundedSender<SendOperation>,
}

impl<M: 'static> Receiver<M> {
    async fn run(self, socket: Arc<UdpSocket>, mut stop: watch::Receiver<bool>) {
        let limit = self.options.max_datagram_size();
        // 多留一个字节，用于识别超长报文。
        let mut buf = vec![0u8; limit + 1];
        loop {
            let received = tokio::select! {
                res = socket.recv_from(&mut buf) => res,
                _ = wait_closed(&mut stop) => break,
            };
            match received {
                // 长度为 0 的读完成对会话意味着 EOF，空报文不能投递。
                Ok((0, peer)) => trace!(%peer, "empty udp datagram ignored"),
                Ok((len, peer)) if len > limit => {
                    warn!(%peer, len, limit, "oversized udp datagram dropped");
                }
                Ok((len, peer)) => {
                    trace!(%peer, len, "udp datagram received");
                    self.dispatch(peer, Bytes::copy_from_slice(&buf[..len]));
                }
                Err(err) => self.recv_failed(err).await,
            }
        }
        debug!("udp receive loop stopped");
    }

    fn dispatch(&self, peer: SocketAddr, datagram: Bytes) {
        let (channel, created) = match self.peers.entry(peer) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let channel = PeerChannel::new(
                    peer,
                    Some(self.local_addr),
                    self.options.peer_backlog(),
                    self.sender.clone(),
                    Arc::downgrade(&self.peers),
                );
                entry.insert(Arc::clone(&channel));
                (channel, true)
            }
        };
        if created {
            let session = run_completion(|| self.factory.open(channel.clone()));
            debug!(%peer, session.id = session.id(), "udp session accepted");
            self.sessions.insert(session);
        }
        channel.deliver(datagram);
    }

    async fn recv_failed(&self, err: io::Error) {
        // ICMP 端口不可达在部分平台上表现为 `ConnectionReset`，不影响其他对端。
        warn!(error = %err, "udp receive failed");
        if !is_retryable_io(&err) {
            tokio::time::sleep(RECV_BACKOFF).await;
        }
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut ops: mpsc::UnboundedReceiver<SendOperation>) {
    while let Some((peer, mut buf, completion)) = ops.recv().await {
        let result = socket.send_to(buf.chunk(), peer).await.map(|sent| {
            buf.advance(sent);
            sent
        });
        if let Err(err) = &result {
            warn!(%peer, error = %err, "udp send failed");
        }
        run_completion(move || completion.write_completed(buf, result));
    }
    debug!("udp send loop stopped");
}
