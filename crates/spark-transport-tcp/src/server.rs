use std::{net::SocketAddr, time::Duration};

use spark_session::{Session, SessionFactory};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    SessionRegistry, TcpSocketConfig,
    error::{self, TcpError},
    stream::{open_session, run_completion, wait_closed},
};

/// `accept` 失败后的退避时长，避免文件描述符耗尽时空转。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TCP 服务端引擎：监听端口，把每个入站连接包装为会话。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 连接建立之后的一切（解码、分发、背压、关闭）都由会话引擎负责，
///   服务端只需专注“接受连接 → 设置套接字 → 交给工厂”；
/// - 引擎停止时需要逐个关闭在线会话，因此维护一张在线会话表。
///
/// ## 逻辑 (How)
/// - `bind` 绑定监听器后启动接受任务，任务以 `tokio::select!` 同时等待新连接与停止信号；
/// - 每接受一个连接先按 [`TcpSocketConfig`] 设置套接字，再经 `StreamChannel` 打开会话；
/// - 在线会话记录在 [`SessionRegistry`] 中，已关闭的会话在下次插入时被剔除；
/// - [`shutdown`](Self::shutdown) 停止接受，优雅关闭全部在线会话，最后调用
///   [`SessionFactory::shutdown`]。
///
/// ## 契约 (What)
/// - 必须在 Tokio 运行时中调用；
/// - 单个连接的套接字设置失败只影响该连接，接受循环继续运行；
/// - 未调用 `shutdown` 而直接丢弃服务端时，接受任务随停止信号发送端一起退出，
///   但在线会话保持不变。
///
/// ## 注意事项 (Trade-offs)
/// - `accept` 失败（例如 `EMFILE`）时短暂退避后重试，而不是终止监听。
pub struct TcpServer<M> {
    local_addr: SocketAddr,
    factory: SessionFactory<M>,
    sessions: SessionRegistry<M>,
    stop: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl<M: 'static> TcpServer<M> {
    /// 绑定地址并开始接受连接。
    pub async fn bind(
        addr: impl ToSocketAddrs,
        factory: SessionFactory<M>,
        config: TcpSocketConfig,
    ) -> Result<Self, TcpError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| TcpError::new(error::BIND, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| TcpError::new(error::BIND, err))?;

        let sessions = SessionRegistry::new();
        let (stop, stop_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            factory.clone(),
            config,
            sessions.clone(),
            stop_rx,
        ));
        info!(addr = %local_addr, "tcp server listening");

        Ok(Self {
            local_addr,
            factory,
            sessions,
            stop,
            accept_task,
        })
    }

    /// 实际绑定的地址；绑定端口 0 时可据此获得系统分配的端口。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn factory(&self) -> &SessionFactory<M> {
        &self.factory
    }

    /// 当前尚未完全关闭的会话数。
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 停止接受连接，优雅关闭全部在线会话，并通知处理器引擎已停止。
    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        if let Err(err) = self.accept_task.await {
            warn!(error = %err, "tcp accept task ended abnormally");
        }
        self.sessions.close_all();
        run_completion(|| self.factory.shutdown());
        info!(addr = %self.local_addr, "tcp server shut down");
    }
}

async fn accept_loop<M: 'static>(
    listener: TcpListener,
    factory: SessionFactory<M>,
    config: TcpSocketConfig,
    sessions: SessionRegistry<M>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = wait_closed(&mut stop) => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                match accept_session(&factory, &config, stream, peer) {
                    Ok(session) => sessions.insert(session),
                    Err(err) => warn!(%peer, error = %err, code = err.code(), "tcp connection rejected"),
                }
            }
            Err(err) => {
                let err = TcpError::new(error::ACCEPT, err);
                warn!(error = %err, retryable = err.is_retryable(), "tcp accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("tcp accept loop stopped");
}

fn accept_session<M: 'static>(
    factory: &SessionFactory<M>,
    config: &TcpSocketConfig,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<Session<M>, TcpError> {
    config
        .apply(&stream)
        .map_err(|err| TcpError::new(error::CONFIGURE, err))?;
    let local = stream.local_addr().ok();
    Ok(open_session(factory, stream, Some(peer), local))
}
