//! 受保护凭据存储模块。
//!
//! 客户端标识写入 Agent 工作目录之外的文件，Agent 自身的文件操作无法触及，
//! 下游的数据访问层（例如行级权限控制）以该文件作为可信来源。

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

/// 默认凭据目录名（位于用户主目录下）。
pub const DEFAULT_DIR_NAME: &str = ".agent-config";
/// 客户端标识文件名。
pub const CLIENT_ID_FILE_NAME: &str = "client_id";

const PREVIEW_LEN: usize = 8;

/// 凭据存储错误类型。
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("客户端标识不能为空")]
    EmptyClientId,

    #[error("客户端标识尚未配置: {0}")]
    NotConfigured(String),

    #[error("无法确定用户主目录")]
    HomeDirUnavailable,

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// 受保护的客户端标识存储。
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// 使用指定目录创建存储实例，目录在首次写入时创建。
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 使用默认位置 `~/.agent-config` 创建存储实例。
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(CredentialError::HomeDirUnavailable)?;
        Ok(Self::new(home.join(DEFAULT_DIR_NAME)))
    }

    /// 凭据目录。
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 客户端标识文件的完整路径。
    pub fn client_id_path(&self) -> PathBuf {
        self.dir.join(CLIENT_ID_FILE_NAME)
    }

    /// 写入客户端标识，覆盖已有内容。
    ///
    /// 写入值会去除首尾空白；空值被拒绝且不会改动已有文件。
    /// 在 unix 平台上目录权限为 `0700`，文件权限为 `0600`。
    /// 内容先写入同目录下的 `0600` 临时文件再原子替换目标，读者不会看到半写状态。
    pub fn write_client_id(&self, client_id: &str) -> Result<()> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(CredentialError::EmptyClientId);
        }

        fs::create_dir_all(&self.dir)?;
        restrict_permissions(&self.dir, 0o700)?;

        let path = self.client_id_path();
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        restrict_permissions(staged.path(), 0o600)?;
        staged.write_all(client_id.as_bytes())?;
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|err| err.error)?;

        info!(
            path = %path.display(),
            client_id = %preview(client_id),
            "client context initialized"
        );
        Ok(())
    }

    /// 读取客户端标识。
    ///
    /// 文件不存在时返回 [`CredentialError::NotConfigured`]，内容为空时返回
    /// [`CredentialError::EmptyClientId`]。
    pub fn read_client_id(&self) -> Result<String> {
        let path = self.client_id_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CredentialError::NotConfigured(path.display().to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let client_id = raw.trim();
        if client_id.is_empty() {
            return Err(CredentialError::EmptyClientId);
        }
        Ok(client_id.to_string())
    }

    /// 读取当前客户端标识，未配置或为空时返回 `None`。
    pub fn current_client_id(&self) -> Result<Option<String>> {
        match self.read_client_id() {
            Ok(client_id) => Ok(Some(client_id)),
            Err(CredentialError::NotConfigured(_) | CredentialError::EmptyClientId) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// 删除客户端标识文件，返回是否确实删除了文件。
    pub fn clear(&self) -> Result<bool> {
        let path = self.client_id_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "client context cleared");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// 生成用于日志的标识预览，仅保留前 8 个字符。
pub fn preview(client_id: &str) -> String {
    let head: String = client_id.chars().take(PREVIEW_LEN).collect();
    format!("{head}...")
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
