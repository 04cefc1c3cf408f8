//! WebSocket API 模块，仅在 `ws-api` feature 启用时可用。

mod handler;

pub use handler::handle_socket;
