use std::{net::SocketAddr, time::Duration};

use spark_session::SessionFactory;
use spark_transport_tcp::{
    SessionRegistry, TcpError, error as tcp_error, open_session, run_completion, wait_closed,
};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{TlsAcceptor, TlsError, TlsServerOptions};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TLS 服务端引擎。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 握手可能耗时数个往返，不能阻塞接受循环，因此每个连接的握手在独立任务中完成；
/// - 握手完成后连接与 TCP 引擎没有区别，直接复用 `StreamChannel` 与会话工厂。
///
/// ## 逻辑 (How)
/// - 接受循环把握手任务放入 `JoinSet`，停止时统一中止尚未完成的握手；
/// - 握手任务在握手成功后同步地打开会话并登记到 [`SessionRegistry`]，
///   中止只会发生在 `await` 点，因此不会出现“会话已打开却未登记”的中间状态；
/// - 握手失败只记录日志，不影响其他连接。
///
/// ## 契约 (What)
/// - [`acceptor`](Self::acceptor) 返回的句柄可在运行期替换证书配置；
/// - [`shutdown`](Self::shutdown) 的顺序与 TCP 引擎一致：停止接受 → 关闭会话 → 工厂 `shutdown`。
pub struct TlsServer<M> {
    local_addr: SocketAddr,
    factory: SessionFactory<M>,
    acceptor: TlsAcceptor,
    sessions: SessionRegistry<M>,
    stop: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl<M: 'static> TlsServer<M> {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        factory: SessionFactory<M>,
        acceptor: TlsAcceptor,
        options: TlsServerOptions,
    ) -> Result<Self, TlsError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| TcpError::new(tcp_error::BIND, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| TcpError::new(tcp_error::BIND, err))?;

        let sessions = SessionRegistry::new();
        let (stop, stop_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Handshake {
                factory: factory.clone(),
                acceptor: acceptor.clone(),
                options,
                sessions: sessions.clone(),
            },
            stop_rx,
        ));
        info!(addr = %local_addr, "tls server listening");

        Ok(Self {
            local_addr,
            factory,
            acceptor,
            sessions,
            stop,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn factory(&self) -> &SessionFactory<M> {
        &self.factory
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        if let Err(err) = self.accept_task.await {
            warn!(error = %err, "tls accept task ended abnormally");
        }
        self.sessions.close_all();
        run_completion(|| self.factory.shutdown());
        info!(addr = %self.local_addr, "tls server shut down");
    }
}

/// 单个握手任务所需的共享状态。
struct Handshake<M> {
    factory: SessionFactory<M>,
    acceptor: TlsAcceptor,
    options: TlsServerOptions,
    sessions: SessionRegistry<M>,
}

impl<M> Clone for Handshake<M> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            acceptor: self.acceptor.clone(),
            options: self.options.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<M: 'static> Handshake<M> {
    async fn run(self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = self.establish(stream, peer).await {
            warn!(
                %peer,
                error = %err,
                code = err.code(),
                security = err.is_security(),
                "tls connection rejected"
            );
        }
    }

    async fn establish(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), TlsError> {
        self.options
            .socket()
            .apply(&stream)
            .map_err(|err| TcpError::new(tcp_error::CONFIGURE, err))?;
        let local = stream.local_addr().ok();
        let tls = self
            .acceptor
            .accept(stream, self.options.handshake_timeout())
            .await?;
        debug!(
            %peer,
            server_name = tls.get_ref().1.server_name(),
            "tls handshake completed"
        );
        let session = open_session(&self.factory, tls, Some(peer), local);
        self.sessions.insert(session);
        Ok(())
    }
}

async fn accept_loop<M: 'static>(
    listener: TcpListener,
    handshake: Handshake<M>,
    mut stop: watch::Receiver<bool>,
) {
    let mut pending = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    pending.spawn(handshake.clone().run(stream, peer));
                }
                Err(err) => {
                    let err = TcpError::new(tcp_error::ACCEPT, err);
                    warn!(error = %err, retryable = err.is_retryable(), "tls accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = pending.join_next(), if !pending.is_empty() => {}
            _ = wait_closed(&mut stop) => break,
        }
    }
    pending.shutdown().await;
    debug!("tls accept loop stopped");
}
