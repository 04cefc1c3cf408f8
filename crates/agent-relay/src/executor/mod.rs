//! Agent 运行时抽象层。
//!
//! 运行时把一次查询建模为长生命周期的双向流：输入端消费
//! [`MessageProducer`]，输出端产出增量结果与旁路诊断文本。
//! 具体实现（如 `claude` CLI）通过 [`AgentRuntime`] 接入，会话层不感知其细节。

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{RelayError, Result};
use crate::queue::MessageProducer;
use crate::session::options::QueryOptions;

pub mod claude_sdk;

pub use claude_sdk::ClaudeSdkRuntime;

/// 运行时输出流中的一项。
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeOutput {
    /// 一条增量结果，原样转发。
    Message(Value),
    /// 一行 stderr 诊断文本。
    Stderr(String),
}

/// 发往运行中查询的控制指令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// 中止当前轮次。
    Interrupt,
}

/// 查询的控制句柄。
#[derive(Debug, Clone)]
pub struct QueryControl {
    sender: mpsc::UnboundedSender<ControlCommand>,
}

impl QueryControl {
    /// 创建控制句柄及其接收端，接收端交给运行时实现。
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// 请求运行时中止当前轮次，尽力而为。
    pub fn interrupt(&self) -> Result<()> {
        self.sender
            .send(ControlCommand::Interrupt)
            .map_err(|_| RelayError::Runtime("agent runtime is no longer running".to_string()))
    }
}

/// 一次运行中的查询。
///
/// 输出通道关闭表示交互正常结束；收到 `Err` 表示交互失败。
pub struct Query {
    pub output: mpsc::Receiver<Result<RuntimeOutput>>,
    pub control: QueryControl,
}

/// Agent 运行时接口。
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// 运行时名称，用于日志。
    fn name(&self) -> &str;

    /// 启动一次查询。
    ///
    /// `prompt` 为输入流，运行时按需从中拉取用户消息；`options` 为会话启动时的配置快照。
    async fn query(&self, prompt: MessageProducer, options: QueryOptions) -> Result<Query>;
}
