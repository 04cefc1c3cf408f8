//! 会话启动配置的合并规则：基线 < 存储配置 < 凭据覆盖。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::config_store::{CLIENT_ID_KEY, CREDENTIAL_OVERRIDE_KEY, SessionConfig};

/// 运行时继承的凭据环境变量名。
pub const CREDENTIAL_ENV_VAR: &str = "ANTHROPIC_API_KEY";
/// 基线权限模式：不受限执行。
pub const DEFAULT_PERMISSION_MODE: &str = "bypassPermissions";

const CWD_KEY: &str = "cwd";
const PERMISSION_MODE_KEY: &str = "permissionMode";
const PARTIAL_MESSAGES_KEY: &str = "includePartialMessages";

/// 一次查询的生效配置。
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub cwd: PathBuf,
    pub permission_mode: String,
    pub include_partial_messages: bool,
    /// 额外注入运行时进程的环境变量。
    pub env: BTreeMap<String, String>,
    /// 透传给运行时的其余选项。
    pub extra: Map<String, Value>,
}

impl QueryOptions {
    /// 固定基线：工作目录、不受限执行、开启增量消息。
    pub fn baseline(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            cwd: workspace_dir.into(),
            permission_mode: DEFAULT_PERMISSION_MODE.to_string(),
            include_partial_messages: true,
            env: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// 把存储配置合并到基线之上，凭据覆盖优先级最高。
    pub fn merged(mut self, stored: &SessionConfig) -> Self {
        for (key, value) in stored.iter() {
            match (key.as_str(), value) {
                (CLIENT_ID_KEY | CREDENTIAL_OVERRIDE_KEY, _) => {}
                (CWD_KEY, Value::String(cwd)) => self.cwd = PathBuf::from(cwd),
                (PERMISSION_MODE_KEY, Value::String(mode)) => self.permission_mode = mode.clone(),
                (PARTIAL_MESSAGES_KEY, Value::Bool(enabled)) => {
                    self.include_partial_messages = *enabled;
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(api_key) = stored.credential_override() {
            self.env
                .insert(CREDENTIAL_ENV_VAR.to_string(), api_key.to_string());
        }
        self
    }
}
