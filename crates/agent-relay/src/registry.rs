//! 连接注册表：维护进程内唯一的活跃连接，并把出站消息转发给它。

use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// 连接唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 已有活跃连接时，新连接被拒绝。
#[derive(Debug, Clone, Copy, Error)]
#[error("another connection is already active")]
pub struct Rejected {
    pub active: ConnectionId,
}

struct ActiveConnection {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

/// 单活跃连接槽位。
#[derive(Default)]
pub struct ConnectionRegistry {
    active: Mutex<Option<ActiveConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试把候选连接设为活跃连接。
    ///
    /// 成功时 `connected` 确认先于任何转发消息进入该连接的发送通道。
    /// 槽位中的连接若发送通道已关闭则视为已断开，直接替换。
    pub fn attach(
        &self,
        id: ConnectionId,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), Rejected> {
        let mut active = self.lock();
        if let Some(current) = active.as_ref() {
            if !current.sender.is_closed() {
                return Err(Rejected { active: current.id });
            }
            debug!(stale_connection_id = %current.id, "replacing closed connection");
        }

        if sender.try_send(ServerMessage::Connected).is_err() {
            warn!(connection_id = %id, "failed to queue connected acknowledgment");
        }
        *active = Some(ActiveConnection {
            id,
            sender: sender.clone(),
        });
        info!(connection_id = %id, "connection attached");
        Ok(())
    }

    /// 若 `id` 为活跃连接则清空槽位，返回是否清空。
    pub fn detach(&self, id: ConnectionId) -> bool {
        let mut active = self.lock();
        match active.as_ref() {
            Some(current) if current.id == id => {
                *active = None;
                info!(connection_id = %id, "connection detached");
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn active_id(&self) -> Option<ConnectionId> {
        self.lock().as_ref().map(|current| current.id)
    }

    /// 把消息发给活跃连接；没有活跃连接时直接丢弃，不做缓存。
    ///
    /// 返回消息是否进入了活跃连接的发送通道。
    pub async fn forward(&self, message: ServerMessage) -> bool {
        let target = self
            .lock()
            .as_ref()
            .map(|current| (current.id, current.sender.clone()));

        let Some((id, sender)) = target else {
            debug!("no active connection, dropping outbound message");
            return false;
        };

        if sender.send(message).await.is_err() {
            debug!(connection_id = %id, "connection closed, dropping outbound message");
            return false;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveConnection>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
