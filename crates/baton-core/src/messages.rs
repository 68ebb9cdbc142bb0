use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;
use crate::tools::ToolCall;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: ToolCallId,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

// --- Convenience constructors ---

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User(UserMessage { content: text.into() })
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage {
            content: Some(text.into()),
            tool_calls: Vec::new(),
            stop_reason: Some(StopReason::EndTurn),
        })
    }

    pub fn tool_result(tool_call_id: ToolCallId, text: impl Into<String>) -> Self {
        Message::ToolResult(ToolResultMessage {
            tool_call_id,
            content: text.into(),
            is_error: false,
        })
    }

    pub fn tool_error(tool_call_id: ToolCallId, text: impl Into<String>) -> Self {
        Message::ToolResult(ToolResultMessage {
            tool_call_id,
            content: text.into(),
            is_error: true,
        })
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::ToolResult(_) => "tool_result",
        }
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            tool_calls: Vec::new(),
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            stop_reason: Some(StopReason::ToolUse),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text_content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}
