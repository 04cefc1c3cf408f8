use thiserror::Error;

/// relay 库的统一错误类型。
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("运行时错误: {0}")]
    Runtime(String),

    #[error("凭据错误: {0}")]
    Credential(#[from] credential_store::CredentialError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
