//! 会话配置 API 路由。
//!
//! `POST /config` 整体替换会话配置，`GET /config` 返回当前配置。

use std::sync::Arc;

use agent_relay::{ConfigStoreError, SessionConfig};
use agent_relay_api_types::ErrorResponse;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use super::state::AppState;

/// 创建配置 API 路由。
pub fn create_config_router() -> Router<Arc<AppState>> {
    Router::new().route("/config", get(get_config).post(set_config))
}

/// 替换会话配置；成功时回显存储的对象。
async fn set_config(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionConfig>, ApiError> {
    let config = SessionConfig::parse(&body)?;
    let stored = state.relay.set_configuration(config)?;
    Ok(Json(stored))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<SessionConfig> {
    Json(state.relay.get_configuration())
}

/// API 错误类型。
#[derive(Debug)]
struct ApiError {
    message: String,
    code: &'static str,
    status: StatusCode,
}

impl From<ConfigStoreError> for ApiError {
    fn from(err: ConfigStoreError) -> Self {
        let (code, status) = match &err {
            ConfigStoreError::InvalidJson(_) | ConfigStoreError::NotAnObject => {
                ("INVALID_CONFIG", StatusCode::BAD_REQUEST)
            }
            ConfigStoreError::InvalidClientId(_) => ("INVALID_CLIENT_ID", StatusCode::BAD_REQUEST),
            ConfigStoreError::Credential(_) => {
                ("CREDENTIAL_WRITE_FAILED", StatusCode::INTERNAL_SERVER_ERROR)
            }
        };
        warn!(code, error = %err, "rejecting session configuration");
        ApiError {
            message: err.to_string(),
            code,
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse::new(self.code, self.message));
        (self.status, body).into_response()
    }
}
