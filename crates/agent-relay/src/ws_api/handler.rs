use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::protocol::ServerMessage;
use crate::registry::ConnectionId;
use crate::relay::Relay;

/// 驱动一条已升级的 WebSocket 连接，直到对端断开。
///
/// 出站消息经由单独的写任务按顺序发出；被拒绝的连接收到一条 `error` 后关闭。
pub async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let connection_id = ConnectionId::new();
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(relay.outbound_buffer_size());
    info!(connection_id = %connection_id, "WebSocket connection established");

    let writer_task = tokio::spawn(async move {
        while let Some(server_msg) = out_rx.recv().await {
            match serde_json::to_string(&server_msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to serialize WebSocket message");
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    if relay.on_open(connection_id, &out_tx).await.is_ok() {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => relay.on_message(connection_id, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "WebSocket receive error");
                    break;
                }
            }
        }
        relay.on_close(connection_id);
    }

    drop(out_tx);
    if let Err(err) = writer_task.await {
        warn!(error = %err, "WebSocket writer task exited with join error");
    }

    info!(connection_id = %connection_id, "WebSocket connection closed");
}
