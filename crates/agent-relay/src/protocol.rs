//! WebSocket 线路协议。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 客户端发送的 WebSocket 消息。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 用户消息，进入入站队列。
    UserMessage { data: UserMessagePayload },
    /// 中断当前轮次。
    Interrupt,
}

/// 用户消息内容。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    #[serde(default, alias = "sessionId")]
    pub session_id: String,
    #[serde(default = "default_role")]
    pub role: String,
    /// 文本或内容块数组，原样透传。
    pub content: Value,
}

fn default_role() -> String {
    "user".to_string()
}

/// 服务端发送的 WebSocket 消息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 连接已接受。
    Connected,
    /// 旁路诊断信息。
    Info { data: String },
    /// Agent 运行时的增量输出，原样转发。
    SdkMessage { data: Value },
    /// 错误消息。
    Error { message: String },
}

/// 写入 Agent 运行时输入流的用户消息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkUserMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub message: SdkMessageBody,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkMessageBody {
    pub role: String,
    pub content: Value,
}

impl SdkUserMessage {
    /// 以纯文本构造用户消息。
    pub fn text(content: impl Into<String>) -> Self {
        Self::from(UserMessagePayload {
            session_id: String::new(),
            role: default_role(),
            content: Value::String(content.into()),
        })
    }

    pub fn content(&self) -> &Value {
        &self.message.content
    }
}

impl From<UserMessagePayload> for SdkUserMessage {
    fn from(payload: UserMessagePayload) -> Self {
        Self {
            kind: "user".to_string(),
            session_id: payload.session_id,
            message: SdkMessageBody {
                role: payload.role,
                content: payload.content,
            },
            parent_tool_use_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_user_message() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"user_message","data":{"content":"ping"}}"#)
                .expect("user message should parse");

        match msg {
            ClientMessage::UserMessage { data } => {
                assert_eq!(data.content, json!("ping"));
                assert_eq!(data.role, "user");
                assert!(data.session_id.is_empty());
            }
            other => panic!("expected UserMessage, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_user_message_with_camel_case_session() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "user_message",
            "data": {
                "sessionId": "s-1",
                "role": "user",
                "content": [{"type": "text", "text": "hi"}]
            }
        }))
        .expect("user message should parse");

        let ClientMessage::UserMessage { data } = msg else {
            panic!("expected UserMessage");
        };
        assert_eq!(data.session_id, "s-1");
        assert!(data.content.is_array());
    }

    #[test]
    fn test_parse_interrupt() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"interrupt"}"#).expect("interrupt should parse");
        assert!(matches!(msg, ClientMessage::Interrupt));
    }

    #[test]
    fn test_malformed_messages_fail() {
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"unknown"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"user_message"}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        assert_eq!(
            serde_json::to_value(ServerMessage::Connected).expect("serialize"),
            json!({"type": "connected"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Info {
                data: "warming up".to_string()
            })
            .expect("serialize"),
            json!({"type": "info", "data": "warming up"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::SdkMessage {
                data: json!({"type": "assistant"})
            })
            .expect("serialize"),
            json!({"type": "sdk_message", "data": {"type": "assistant"}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Error {
                message: "boom".to_string()
            })
            .expect("serialize"),
            json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn test_sdk_user_message_shape() {
        let payload = UserMessagePayload {
            session_id: "s-1".to_string(),
            role: "user".to_string(),
            content: json!("ping"),
        };

        let value = serde_json::to_value(SdkUserMessage::from(payload)).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "user",
                "session_id": "s-1",
                "message": {"role": "user", "content": "ping"},
                "parent_tool_use_id": null
            })
        );
    }
}
