//! Credential Store - 受保护凭据存储。
//!
//! 该 crate 负责把调用方提供的客户端标识持久化到 Agent 工作目录之外，
//! 供 relay 的配置端点写入、供下游数据访问层读取。

pub mod store;

pub use store::{
    CLIENT_ID_FILE_NAME, CredentialError, CredentialStore, DEFAULT_DIR_NAME, Result, preview,
};
