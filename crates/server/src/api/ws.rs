//! WebSocket API 处理器包装。
//!
//! 将统一的应用状态适配到 agent_relay 的 WebSocket handler。

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use tracing::info;

use super::state::AppState;

/// Axum WebSocket 升级 handler。
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("new WebSocket connection request");
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| agent_relay::ws_api::handle_socket(socket, relay))
}
