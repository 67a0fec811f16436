//! 行回显示例的可复用部分：服务配置与回显处理器。
//!
//! 二进制 `line_echo` 只负责解析命令行、安装日志订阅器并把这里的组件交给引擎。

use std::{error::Error, fs, net::SocketAddr};

use anyhow::{Context, bail};

use serde::{Deserialize, Serialize};
use spark_session::{BoxError, Processor, Session, SessionConfig, StateEvent};
use spark_transport_tcp::TcpSocketConfig;
use spark_transport_udp::UdpOptions;
use tracing::{info, warn};

/// 行回显服务配置，通常从 TOML 文件加载。
///
/// ```toml
/// tcp = "127.0.0.1:7000"
/// udp = "127.0.0.1:7001"
///
/// [session]
/// write_queue_capacity = 256
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// TCP 监听地址。
    pub tcp: SocketAddr,
    /// UDP 绑定地址；缺省时不启动 UDP 引擎。
    pub udp: Option<SocketAddr>,
    pub session: SessionConfig,
    pub socket: TcpSocketConfig,
    pub datagram: UdpOptions,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            tcp: SocketAddr::from(([127, 0, 0, 1], 7000)),
            udp: None,
            session: SessionConfig::default(),
            socket: TcpSocketConfig::default(),
            datagram: UdpOptions::default(),
        }
    }
}

impl ServeConfig {
    /// 解析 TOML 并校验会话配置。
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.session.validate()?;
        Ok(config)
    }

    /// 解析命令行参数（不含程序名）。
    ///
    /// `--config FILE` 先加载文件，`--tcp` / `--udp` 再覆盖其中的地址；未知参数直接报错。
    pub fn from_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let mut tcp: Option<SocketAddr> = None;
        let mut udp: Option<SocketAddr> = None;
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("{flag} requires a value"))
            };
            match flag.as_str() {
                "--config" => {
                    let path = value()?;
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {path}"))?;
                    config = Self::from_toml_str(&text)
                        .with_context(|| format!("invalid config {path}"))?;
                }
                "--tcp" => tcp = Some(value()?.parse().context("invalid --tcp address")?),
                "--udp" => udp = Some(value()?.parse().context("invalid --udp address")?),
                other => bail!(
                    "unknown argument `{other}`; usage: line_echo [--config FILE] [--tcp ADDR] [--udp ADDR]"
                ),
            }
        }
        if let Some(tcp) = tcp {
            config.tcp = tcp;
        }
        if udp.is_some() {
            config.udp = udp;
        }
        Ok(config)
    }
}

/// 回显处理器：原样写回每一行，收到 `quit` 时优雅关闭会话。
#[derive(Debug, Default)]
pub struct LineEcho;

impl LineEcho {
    pub const QUIT: &'static str = "quit";
}

impl Processor<String> for LineEcho {
    fn on_message(&self, session: &Session<String>, line: &String) -> Result<(), BoxError> {
        if line == Self::QUIT {
            session.write(&"bye".to_owned())?;
            session.close_with(false);
            return Ok(());
        }
        session.write(line)?;
        Ok(())
    }

    fn on_state_change(
        &self,
        session: &Session<String>,
        event: StateEvent,
        error: Option<&(dyn Error + 'static)>,
    ) {
        match error {
            Some(error) => warn!(session.id = session.id(), ?event, %error, "session event"),
            None => info!(
                session.id = session.id(),
                peer = ?session.peer_addr(),
                ?event,
                "session event"
            ),
        }
    }

    fn on_shutdown(&self) {
        info!("line echo engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_partial_toml() {
        let config = ServeConfig::from_toml_str(
            r#"
            tcp = "0.0.0.0:9000"
            udp = "0.0.0.0:9001"

            [session]
            write_queue_capacity = 16

            [socket]
            nodelay = false
            "#,
        )
        .unwrap();

        assert_eq!(config.tcp, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.udp, Some("0.0.0.0:9001".parse().unwrap()));
        assert_eq!(config.session.write_queue_capacity, 16);
        assert_eq!(config.session.read_buffer_size, 512);
        assert!(!config.socket.nodelay());
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn address_flags_override_defaults() {
        let config =
            ServeConfig::from_args(args(&["--tcp", "127.0.0.1:7100", "--udp", "127.0.0.1:7101"]))
                .unwrap();
        assert_eq!(config.tcp, "127.0.0.1:7100".parse().unwrap());
        assert_eq!(config.udp, Some("127.0.0.1:7101".parse().unwrap()));
    }

    #[test]
    fn unknown_arguments_are_reported_not_skipped() {
        for bad in ["quick", "--quick"] {
            let err = ServeConfig::from_args(args(&["--tcp", "127.0.0.1:7100", bad])).unwrap_err();
            assert!(err.to_string().contains(bad), "{err}");
        }
        assert!(ServeConfig::from_args(args(&["--tcp"])).is_err());
    }

    #[test]
    fn invalid_session_values_are_rejected() {
        let result = ServeConfig::from_toml_str(
            r#"
            [session]
            read_buffer_size = 0
            "#,
        );
        assert!(result.is_err());
    }
}
