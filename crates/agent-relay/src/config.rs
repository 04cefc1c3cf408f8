use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
type Result<T> = anyhow::Result<T>;

/// 进程级 relay 配置，从 TOML 文件加载。
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Agent 的工作目录，同时是会话基线配置中的 `cwd`。
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    /// 受保护凭据目录；缺省时使用 `~/.agent-config`。
    #[serde(default)]
    pub credential_dir: Option<PathBuf>,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    #[serde(default = "default_outbound_buffer_size")]
    pub outbound_buffer_size: usize,
    /// 会话因错误终止后，下一个连接是否重新启动会话。
    #[serde(default)]
    pub restart_failed_session: bool,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl RelayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("failed to deserialize relay config")
    }

    /// 生产者空闲时的重试间隔。
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            workspace_dir: default_workspace_dir(),
            credential_dir: None,
            idle_interval_ms: default_idle_interval_ms(),
            outbound_buffer_size: default_outbound_buffer_size(),
            restart_failed_session: false,
            agent: AgentConfig::default(),
        }
    }
}

/// Agent 运行时（`claude` CLI）的启动配置。
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_command")]
    pub command: String,
    /// 为空时使用内置的 stream-json 参数。
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_idle_interval_ms() -> u64 {
    100
}

fn default_outbound_buffer_size() -> usize {
    64
}

fn default_command() -> String {
    "claude".to_string()
}
