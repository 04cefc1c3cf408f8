//! 会话配置存储。
//!
//! 进程级、后写覆盖的键值配置，通过控制端点整体替换，在 Agent 会话启动时读取一次。

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use credential_store::{CredentialError, CredentialStore, preview};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

/// 客户端标识字段，写入受保护凭据文件。
pub const CLIENT_ID_KEY: &str = "clientId";
/// 凭据覆盖字段，替换运行时继承的环境凭据。
pub const CREDENTIAL_OVERRIDE_KEY: &str = "anthropicApiKey";

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("配置不是合法的 JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("配置必须是 JSON 对象")]
    NotAnObject,

    #[error("clientId 无效: {0}")]
    InvalidClientId(String),

    #[error("凭据写入失败: {0}")]
    Credential(#[from] CredentialError),
}

/// 一份会话配置（JSON 对象）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionConfig(Map<String, Value>);

impl SessionConfig {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// 从请求体解析，非 JSON 或非对象均视为错误。
    pub fn parse(body: &[u8]) -> Result<Self, ConfigStoreError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::try_from(value)
    }

    /// 客户端标识；存在但不是非空字符串时报错。
    pub fn client_id(&self) -> Result<Option<&str>, ConfigStoreError> {
        match self.0.get(CLIENT_ID_KEY) {
            None => Ok(None),
            Some(Value::String(id)) if !id.trim().is_empty() => Ok(Some(id.as_str())),
            Some(Value::String(_)) => Err(ConfigStoreError::InvalidClientId(
                "clientId must not be empty".to_string(),
            )),
            Some(other) => Err(ConfigStoreError::InvalidClientId(format!(
                "clientId must be a string, got {other}"
            ))),
        }
    }

    pub fn credential_override(&self) -> Option<&str> {
        self.0
            .get(CREDENTIAL_OVERRIDE_KEY)
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl TryFrom<Value> for SessionConfig {
    type Error = ConfigStoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(ConfigStoreError::NotAnObject),
        }
    }
}

impl From<SessionConfig> for Value {
    fn from(config: SessionConfig) -> Self {
        Value::Object(config.0)
    }
}

/// 会话配置存储，持有受保护凭据存储以便同步写入客户端标识。
#[derive(Debug)]
pub struct SessionConfigStore {
    current: RwLock<SessionConfig>,
    credentials: CredentialStore,
}

impl SessionConfigStore {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            current: RwLock::new(SessionConfig::default()),
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// 整体替换当前配置。
    ///
    /// 若包含 `clientId`，先写入凭据文件再替换；校验或写入失败时配置保持不变。
    /// 写锁覆盖整个过程，并发调用下凭据文件与存储配置始终来自同一次调用。
    pub fn set(&self, config: SessionConfig) -> Result<SessionConfig, ConfigStoreError> {
        let mut current = self.write();
        if let Some(client_id) = config.client_id()? {
            self.credentials.write_client_id(client_id)?;
            info!(client_id = %preview(client_id.trim()), "client id persisted");
        }

        *current = config.clone();
        drop(current);
        info!(keys = config.as_map().len(), "session configuration replaced");
        Ok(config)
    }

    /// 当前配置快照。
    pub fn snapshot(&self) -> SessionConfig {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionConfig> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionConfig> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
