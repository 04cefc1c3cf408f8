//! Agent 会话：一次运行时查询的包装，以及其输出转发循环。

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::Result;
use crate::events::AgentEvent;
use crate::executor::{AgentRuntime, QueryControl, RuntimeOutput};
use crate::queue::{MessageProducer, ProducerStopHandle};
use crate::registry::ConnectionRegistry;

/// 会话启动配置与合并规则。
pub mod options;

pub use options::QueryOptions;

/// 会话唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// 生成新的随机会话 ID。
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 会话运行状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 输出流仍在转发中。
    Running,
    /// 运行时输出流正常结束。
    Completed,
    /// 交互失败，会话已终止。
    Failed(String),
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// 会话句柄：中断控制与状态观察。
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: QueryControl,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// 请求中止当前轮次。
    pub fn interrupt(&self) -> Result<()> {
        self.control.interrupt()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// 等待会话结束，返回最终状态。
    pub async fn finished(&self) -> SessionStatus {
        let mut status = self.status.clone();
        let _ = status.wait_for(|current| !current.is_running()).await;
        status.borrow().clone()
    }
}

/// 一次运行中的 Agent 会话。
pub struct AgentSession {
    id: SessionId,
    runtime_name: String,
    started_at: DateTime<Utc>,
    handle: SessionHandle,
    stop: ProducerStopHandle,
    forward_task: JoinHandle<()>,
}

impl AgentSession {
    /// 启动一次查询并开始把输出转发到活跃连接。
    #[tracing::instrument(skip_all, fields(runtime = runtime.name()))]
    pub async fn start(
        runtime: &dyn AgentRuntime,
        producer: MessageProducer,
        options: QueryOptions,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        let id = SessionId::new();
        info!(
            session_id = %id,
            cwd = %options.cwd.display(),
            permission_mode = %options.permission_mode,
            "starting agent session"
        );

        let stop = producer.stop_handle();
        let query = match runtime.query(producer, options).await {
            Ok(query) => query,
            Err(err) => {
                stop.stop();
                return Err(err);
            }
        };

        let (status_tx, status_rx) = watch::channel(SessionStatus::Running);
        let forward_task = tokio::spawn(forward_output(
            id.clone(),
            query.output,
            registry,
            stop.clone(),
            status_tx,
        ));

        Ok(Self {
            id,
            runtime_name: runtime.name().to_string(),
            started_at: Utc::now(),
            handle: SessionHandle {
                control: query.control,
                status: status_rx,
            },
            stop,
            forward_task,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn status(&self) -> SessionStatus {
        self.handle.status()
    }

    pub fn interrupt(&self) -> Result<()> {
        info!(session_id = %self.id, "interrupting agent session");
        self.handle.interrupt()
    }

    /// 放弃会话：停止生产者并结束转发，丢弃输出通道会让运行时退出。
    pub fn abort(&self) {
        info!(session_id = %self.id, "aborting agent session");
        self.stop.stop();
        self.forward_task.abort();
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.stop.stop();
        self.forward_task.abort();
    }
}

async fn forward_output(
    session_id: SessionId,
    mut output: mpsc::Receiver<Result<RuntimeOutput>>,
    registry: Arc<ConnectionRegistry>,
    stop: ProducerStopHandle,
    status: watch::Sender<SessionStatus>,
) {
    let final_status = loop {
        match output.recv().await {
            Some(Ok(RuntimeOutput::Message(payload))) => {
                registry
                    .forward(AgentEvent::SdkMessage { payload }.into())
                    .await;
            }
            Some(Ok(RuntimeOutput::Stderr(text))) => {
                debug!(session_id = %session_id, line = %text, "agent runtime diagnostic");
                registry.forward(AgentEvent::Info { text }.into()).await;
            }
            Some(Err(err)) => {
                // 先放弃生产者，之后入队的消息留给下一个会话
                stop.stop();
                let message = format!("agent session failed: {err}");
                error!(session_id = %session_id, error = %err, "agent session failed");
                registry
                    .forward(
                        AgentEvent::Error {
                            message: message.clone(),
                        }
                        .into(),
                    )
                    .await;
                break SessionStatus::Failed(message);
            }
            None => {
                info!(session_id = %session_id, "agent output stream ended");
                break SessionStatus::Completed;
            }
        }
    };

    stop.stop();
    status.send_replace(final_status);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::{SdkUserMessage, ServerMessage};
    use crate::queue::{InboundQueue, MessageProducer};
    use crate::registry::{ConnectionId, ConnectionRegistry};

    mod common {
        mod agent_relay {
            pub use crate::{
                AgentRuntime, MessageProducer, Query, QueryControl, QueryOptions, RelayError,
                Result, RuntimeOutput, SdkUserMessage,
            };
        }

        include!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/common/mod.rs"));
    }

    use common::MockRuntime;

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        runtime: MockRuntime,
        queue: Arc<InboundQueue>,
        registry: Arc<ConnectionRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                runtime: MockRuntime::new(),
                queue: Arc::new(InboundQueue::new()),
                registry: Arc::new(ConnectionRegistry::new()),
            }
        }

        fn producer(&self) -> MessageProducer {
            MessageProducer::new(self.queue.clone(), Duration::from_millis(10))
        }

        async fn start(&self) -> AgentSession {
            AgentSession::start(
                &self.runtime,
                self.producer(),
                QueryOptions::baseline("/srv/workspace"),
                self.registry.clone(),
            )
            .await
            .expect("session should start")
        }

        async fn connect(&self) -> mpsc::Receiver<ServerMessage> {
            let (tx, mut rx) = mpsc::channel(16);
            self.registry
                .attach(ConnectionId::new(), &tx)
                .expect("connection should attach");
            assert_eq!(recv(&mut rx).await, ServerMessage::Connected);
            rx
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("message should arrive in time")
            .expect("channel should be open")
    }

    #[tokio::test]
    async fn test_forwards_output_in_order() {
        let fixture = Fixture::new();
        let mut rx = fixture.connect().await;
        let session = fixture.start().await;

        fixture
            .runtime
            .emit(RuntimeOutput::Message(json!({"type": "assistant", "n": 1})))
            .await;
        fixture
            .runtime
            .emit(RuntimeOutput::Stderr("warming up".to_string()))
            .await;
        fixture
            .runtime
            .emit(RuntimeOutput::Message(json!({"type": "result", "n": 2})))
            .await;

        assert_eq!(
            recv(&mut rx).await,
            ServerMessage::SdkMessage {
                data: json!({"type": "assistant", "n": 1})
            }
        );
        assert_eq!(
            recv(&mut rx).await,
            ServerMessage::Info {
                data: "warming up".to_string()
            }
        );
        assert_eq!(
            recv(&mut rx).await,
            ServerMessage::SdkMessage {
                data: json!({"type": "result", "n": 2})
            }
        );
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.runtime_name(), "mock-runtime");
    }

    #[tokio::test]
    async fn test_diagnostics_dropped_without_connection() {
        let fixture = Fixture::new();
        let _session = fixture.start().await;

        fixture
            .runtime
            .emit(RuntimeOutput::Stderr("nobody is listening".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = fixture.connect().await;
        fixture
            .runtime
            .emit(RuntimeOutput::Stderr("now someone is".to_string()))
            .await;

        assert_eq!(
            recv(&mut rx).await,
            ServerMessage::Info {
                data: "now someone is".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_producer_feeds_runtime() {
        let fixture = Fixture::new();
        let _session = fixture.start().await;

        fixture.queue.enqueue(SdkUserMessage::text("ping"));

        let input = fixture
            .runtime
            .next_input(WAIT)
            .await
            .expect("runtime should receive input");
        assert_eq!(input.content(), &json!("ping"));
        assert!(fixture.runtime.next_input(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn test_runtime_failure_terminates_session() {
        let fixture = Fixture::new();
        let mut rx = fixture.connect().await;
        let session = fixture.start().await;

        fixture.runtime.fail("stream exploded").await;

        match recv(&mut rx).await {
            ServerMessage::Error { message } => assert!(message.contains("stream exploded")),
            other => panic!("expected Error, got: {other:?}"),
        }

        let status = tokio::time::timeout(WAIT, session.handle().finished())
            .await
            .expect("session should finish");
        assert!(matches!(status, SessionStatus::Failed(_)));
        assert_eq!(status.label(), "failed");
    }

    #[tokio::test]
    async fn test_failure_abandons_producer_before_reporting() {
        let fixture = Fixture::new();
        // 容量为 1 且已被 connected 占满，错误转发会一直阻塞
        let (tx, mut rx) = mpsc::channel(1);
        fixture
            .registry
            .attach(ConnectionId::new(), &tx)
            .expect("connection should attach");
        let _session = fixture.start().await;

        fixture.runtime.fail("stream exploded").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        fixture.queue.enqueue(SdkUserMessage::text("for the next session"));
        assert!(fixture.runtime.next_input(Duration::from_millis(100)).await.is_none());
        assert_eq!(fixture.queue.len(), 1);

        assert_eq!(recv(&mut rx).await, ServerMessage::Connected);
        assert!(matches!(recv(&mut rx).await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_stream_end_completes_and_abandons_producer() {
        let fixture = Fixture::new();
        let session = fixture.start().await;

        fixture.runtime.finish();

        let status = tokio::time::timeout(WAIT, session.handle().finished())
            .await
            .expect("session should finish");
        assert_eq!(status, SessionStatus::Completed);

        fixture.queue.enqueue(SdkUserMessage::text("too late"));
        assert!(fixture.runtime.next_input(Duration::from_millis(50)).await.is_none());
        assert_eq!(fixture.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_reaches_runtime() {
        let fixture = Fixture::new();
        let session = fixture.start().await;

        session.interrupt().expect("interrupt should be delivered");

        tokio::time::timeout(WAIT, async {
            while fixture.runtime.interrupts() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("runtime should observe the interrupt");
    }

    #[tokio::test]
    async fn test_launch_failure_stops_producer() {
        let fixture = Fixture::new();
        fixture.runtime.fail_next_launch();
        let producer = fixture.producer();
        let stop = producer.stop_handle();

        let result = AgentSession::start(
            &fixture.runtime,
            producer,
            QueryOptions::baseline("/srv/workspace"),
            fixture.registry.clone(),
        )
        .await;

        assert!(result.is_err());
        assert!(stop.is_stopped());
    }
}
