//! 行回显服务：同时在 TCP（以及可选的 UDP）上回显每一行文本。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=spark_session=debug,info cargo run --bin line_echo -- --config echo.toml
//! cargo run --bin line_echo -- --tcp 127.0.0.1:7000 --udp 127.0.0.1:7001
//! ```
//! - `--config`：TOML 配置文件，字段见 `spark_examples::ServeConfig`；
//! - `--tcp` / `--udp`：覆盖配置文件中的监听地址；
//! - 按 Ctrl-C 停止：先停止接受连接，再优雅关闭全部会话。

use std::env;

use anyhow::Context;
use spark_codec_line::LineCodec;
use spark_examples::{LineEcho, ServeConfig};
use spark_session::{Pipeline, SessionFactory};
use spark_transport_tcp::TcpServer;
use spark_transport_udp::UdpEndpoint;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServeConfig::from_args(env::args().skip(1))?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(serve(config))
}

async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    let factory = SessionFactory::new(
        config.session.clone(),
        LineCodec::default(),
        Pipeline::new(LineEcho),
    )?;

    let tcp = TcpServer::bind(config.tcp, factory.clone(), config.socket.clone()).await?;
    let udp = match config.udp {
        Some(addr) => Some(UdpEndpoint::bind(addr, factory.clone(), config.datagram.clone()).await?),
        None => None,
    };
    info!(tcp = %tcp.local_addr(), udp = ?udp.as_ref().map(UdpEndpoint::local_addr), "line echo ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Some(udp) = udp {
        udp.shutdown().await;
    }
    tcp.shutdown().await;
    Ok(())
}
