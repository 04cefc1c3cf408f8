//! 健康检查与运行状态。

use std::sync::Arc;

use agent_relay::SessionStatus;
use agent_relay_api_types::{HealthCheckResponse, RelayStatusResponse, SessionState};
use axum::{Json, Router, extract::State, routing::get};

use super::state::AppState;

pub fn create_status_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
}

async fn health() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse::ok())
}

/// 当前是否有活跃连接，以及唯一 Agent 会话所处的阶段与启动时间。
async fn status(State(state): State<Arc<AppState>>) -> Json<RelayStatusResponse> {
    let (session_status, session_error) = match state.relay.session_status().await {
        None => (SessionState::NotStarted, None),
        Some(SessionStatus::Running) => (SessionState::Running, None),
        Some(SessionStatus::Completed) => (SessionState::Completed, None),
        Some(SessionStatus::Failed(reason)) => (SessionState::Failed, Some(reason)),
    };

    let session_started_at = state
        .relay
        .session_started_at()
        .await
        .map(|started_at| started_at.to_rfc3339());

    Json(RelayStatusResponse {
        connection_active: state.relay.is_connected(),
        session_status,
        session_error,
        session_started_at,
    })
}
