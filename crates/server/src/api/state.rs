//! 统一的应用状态。

use std::sync::Arc;

use agent_relay::Relay;

/// 所有路由共享的状态。
#[derive(Clone)]
pub struct AppState {
    /// 进程内唯一的 relay。
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}
