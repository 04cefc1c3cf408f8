//! API 路由模块。
//!
//! 控制端点、健康检查与 WebSocket 升级共用一个 [`AppState`]。

pub mod config;
pub mod state;
pub mod status;
pub mod ws;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};

pub use config::create_config_router;
pub use state::AppState;
pub use status::create_status_router;
pub use ws::websocket_handler;

/// 组装完整路由。
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .merge(create_config_router())
        .merge(create_status_router())
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
