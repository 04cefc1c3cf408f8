use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ServerMessage;

/// Agent 会话输出流中的事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 一条增量输出（助手文本、工具调用、工具结果或最终结果摘要）。
    SdkMessage {
        /// 运行时原始负载。
        payload: Value,
    },
    /// 旁路诊断文本，例如运行时的 stderr。
    Info {
        /// 诊断文本。
        text: String,
    },
    /// 交互失败，会话随之终止。
    Error {
        /// 错误描述。
        message: String,
    },
}

impl From<AgentEvent> for ServerMessage {
    fn from(event: AgentEvent) -> Self {
        match event {
            AgentEvent::SdkMessage { payload } => ServerMessage::SdkMessage { data: payload },
            AgentEvent::Info { text } => ServerMessage::Info { data: text },
            AgentEvent::Error { message } => ServerMessage::Error { message },
        }
    }
}
