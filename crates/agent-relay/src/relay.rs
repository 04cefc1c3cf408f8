use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use credential_store::CredentialStore;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::config_store::{ConfigStoreError, SessionConfig, SessionConfigStore};
use crate::protocol::{ClientMessage, SdkUserMessage, ServerMessage};
use crate::queue::{InboundQueue, MessageProducer};
use crate::registry::{ConnectionId, ConnectionRegistry, Rejected};
use crate::session::{AgentSession, QueryOptions, SessionStatus};
use crate::{AgentRuntime, RelayConfig, Result};

/// 发给被拒绝连接的错误文本。
pub const REJECTION_MESSAGE: &str = "Another client is already connected";

enum SessionSlot {
    NotStarted,
    Started(AgentSession),
    StartFailed(String),
}

/// 进程级会话管理器。
///
/// 持有入站队列、连接槽位、会话配置与唯一的 Agent 会话，对外只暴露
/// `on_open` / `on_message` / `on_close` 与配置读写四类操作。
pub struct Relay {
    runtime: Arc<dyn AgentRuntime>,
    queue: Arc<InboundQueue>,
    registry: Arc<ConnectionRegistry>,
    config_store: SessionConfigStore,
    session: Mutex<SessionSlot>,
    workspace_dir: PathBuf,
    idle_interval: Duration,
    outbound_buffer_size: usize,
    restart_failed_session: bool,
}

impl Relay {
    pub fn new(config: &RelayConfig, runtime: Arc<dyn AgentRuntime>) -> Result<Self> {
        let credentials = match &config.credential_dir {
            Some(dir) => CredentialStore::new(dir),
            None => CredentialStore::from_home()?,
        };

        info!(
            runtime = runtime.name(),
            workspace_dir = %config.workspace_dir.display(),
            credential_dir = %credentials.dir().display(),
            idle_interval_ms = config.idle_interval_ms,
            restart_failed_session = config.restart_failed_session,
            "initializing relay"
        );

        Ok(Self {
            runtime,
            queue: Arc::new(InboundQueue::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            config_store: SessionConfigStore::new(credentials),
            session: Mutex::new(SessionSlot::NotStarted),
            workspace_dir: config.workspace_dir.clone(),
            idle_interval: config.idle_interval(),
            outbound_buffer_size: config.outbound_buffer_size.max(1),
            restart_failed_session: config.restart_failed_session,
        })
    }

    /// 新连接到达。
    ///
    /// 没有活跃连接时接受它、发送 `connected`，并在需要时启动 Agent 会话；
    /// 否则向候选连接发送一条 `error` 并返回 [`Rejected`]，调用方随后关闭它。
    #[tracing::instrument(skip(self, sender))]
    pub async fn on_open(
        &self,
        connection_id: ConnectionId,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> std::result::Result<(), Rejected> {
        if let Err(rejected) = self.registry.attach(connection_id, sender) {
            warn!(
                connection_id = %connection_id,
                active_connection_id = %rejected.active,
                "rejecting connection, another client is active"
            );
            let _ = sender.try_send(ServerMessage::Error {
                message: REJECTION_MESSAGE.to_string(),
            });
            return Err(rejected);
        }

        self.ensure_session().await;
        Ok(())
    }

    /// 处理来自连接的一帧文本。
    ///
    /// 用户消息进入入站队列，中断指令路由到会话；无法解析的帧被丢弃。
    pub async fn on_message(&self, connection_id: ConnectionId, payload: &str) {
        if self.registry.active_id() != Some(connection_id) {
            debug!(connection_id = %connection_id, "ignoring message from inactive connection");
            return;
        }

        match serde_json::from_str::<ClientMessage>(payload) {
            Ok(ClientMessage::UserMessage { data }) => {
                self.enqueue(SdkUserMessage::from(data));
            }
            Ok(ClientMessage::Interrupt) => self.interrupt().await,
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "dropping malformed client message"
                );
            }
        }
    }

    /// 连接断开；会话继续运行，其输出在新连接接入前被丢弃。
    pub fn on_close(&self, connection_id: ConnectionId) {
        if !self.registry.detach(connection_id) {
            debug!(connection_id = %connection_id, "closed connection was not active");
        }
    }

    pub fn enqueue(&self, message: SdkUserMessage) {
        self.queue.enqueue(message);
    }

    /// 整体替换会话配置，包含 `clientId` 时同步写入受保护凭据文件。
    pub fn set_configuration(
        &self,
        config: SessionConfig,
    ) -> std::result::Result<SessionConfig, ConfigStoreError> {
        self.config_store.set(config)
    }

    pub fn get_configuration(&self) -> SessionConfig {
        self.config_store.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.registry.is_active()
    }

    /// 每条连接出站通道的容量。
    pub fn outbound_buffer_size(&self) -> usize {
        self.outbound_buffer_size
    }

    pub fn pending_messages(&self) -> usize {
        self.queue.len()
    }

    /// 当前会话状态，尚未启动时为 `None`。
    pub async fn session_status(&self) -> Option<SessionStatus> {
        match &*self.session.lock().await {
            SessionSlot::NotStarted => None,
            SessionSlot::Started(session) => Some(session.status()),
            SessionSlot::StartFailed(reason) => Some(SessionStatus::Failed(reason.clone())),
        }
    }

    /// 当前会话的启动时间，未成功启动时为 `None`。
    pub async fn session_started_at(&self) -> Option<DateTime<Utc>> {
        match &*self.session.lock().await {
            SessionSlot::Started(session) => Some(session.started_at()),
            _ => None,
        }
    }

    /// 等待当前会话结束。
    pub async fn wait_session_finished(&self) -> Option<SessionStatus> {
        let handle = match &*self.session.lock().await {
            SessionSlot::Started(session) => session.handle().clone(),
            SessionSlot::StartFailed(reason) => return Some(SessionStatus::Failed(reason.clone())),
            SessionSlot::NotStarted => return None,
        };
        Some(handle.finished().await)
    }

    /// 进程退出前放弃运行中的会话。
    pub async fn shutdown(&self) {
        if let SessionSlot::Started(session) = &*self.session.lock().await {
            session.abort();
        }
    }

    async fn interrupt(&self) {
        match &*self.session.lock().await {
            SessionSlot::Started(session) => {
                if let Err(err) = session.interrupt() {
                    warn!(error = %err, "failed to interrupt agent session");
                }
            }
            _ => debug!("interrupt received with no running agent session"),
        }
    }

    async fn ensure_session(&self) {
        let mut slot = self.session.lock().await;
        let should_start = match &*slot {
            SessionSlot::NotStarted => true,
            SessionSlot::Started(session) => {
                self.restart_failed_session && matches!(session.status(), SessionStatus::Failed(_))
            }
            SessionSlot::StartFailed(_) => self.restart_failed_session,
        };
        if !should_start {
            return;
        }

        let producer = MessageProducer::new(self.queue.clone(), self.idle_interval);
        let options = QueryOptions::baseline(&self.workspace_dir)
            .merged(&self.config_store.snapshot());

        match AgentSession::start(
            self.runtime.as_ref(),
            producer,
            options,
            self.registry.clone(),
        )
        .await
        {
            Ok(session) => {
                info!(session_id = %session.id(), "agent session started");
                *slot = SessionSlot::Started(session);
            }
            Err(err) => {
                let message = format!("failed to start agent session: {err}");
                error!(error = %err, "failed to start agent session");
                self.registry
                    .forward(ServerMessage::Error {
                        message: message.clone(),
                    })
                    .await;
                *slot = SessionSlot::StartFailed(message);
            }
        }
    }
}
