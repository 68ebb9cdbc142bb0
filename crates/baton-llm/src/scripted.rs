use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use baton_core::errors::ProviderError;
use baton_core::ids::ToolCallId;
use baton_core::messages::{AssistantMessage, Message};
use baton_core::provider::{InvokeRequest, ModelProvider, ModelReply};
use baton_core::tools::ToolCall;

/// One pre-programmed round-trip outcome.
pub enum ScriptedReply {
    Reply(ModelReply),
    Error(ProviderError),
}

impl ScriptedReply {
    /// A plain text reply with no tool calls.
    pub fn text(text: &str) -> Self {
        Self::Reply(ModelReply {
            messages: vec![Message::assistant(text)],
            tool_calls: Vec::new(),
        })
    }

    /// A reply invoking a single tool.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![(name, arguments)])
    }

    /// A reply invoking several tools in order.
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        let tool_calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|(name, arguments)| ToolCall {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            })
            .collect();
        Self::Reply(ModelReply {
            messages: vec![Message::Assistant(AssistantMessage::with_tool_calls(
                tool_calls.clone(),
            ))],
            tool_calls,
        })
    }

    pub fn error(error: ProviderError) -> Self {
        Self::Error(error)
    }
}

/// Deterministic provider double: hands out pre-programmed replies in order
/// and keeps every request it saw for later assertions.
///
/// Running past the script is an error, so a test's reply count doubles as
/// an upper bound on round-trips.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply, ProviderError> {
        self.requests.lock().push(request.clone());
        match self.replies.lock().pop_front() {
            Some(ScriptedReply::Reply(reply)) => Ok(reply),
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(ProviderError::InvalidRequest(
                "no scripted reply left".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::thread::Thread;
    use serde_json::json;
    use std::sync::Arc;

    fn request(model: &str) -> InvokeRequest {
        InvokeRequest {
            instructions: "do the work".to_string(),
            tools: Vec::new(),
            thread: Arc::new(Thread::new()),
            model: model.to_string(),
        }
    }

    #[tokio::test]
    async fn replies_come_back_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("first"),
            ScriptedReply::tool_call("complete_task_1", json!({"result": 5})),
        ]);

        let reply = provider.invoke(&request("m")).await.unwrap();
        assert!(reply.tool_calls.is_empty());
        assert!(matches!(&reply.messages[0], Message::Assistant(a) if a.text_content() == "first"));

        let reply = provider.invoke(&request("m")).await.unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "complete_task_1");
        assert_eq!(reply.tool_calls[0].arguments, json!({"result": 5}));
        assert!(matches!(&reply.messages[0], Message::Assistant(a) if a.has_tool_calls()));

        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_errors_surface() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::error(
            ProviderError::ProviderOverloaded,
        )]);
        let err = provider.invoke(&request("m")).await.unwrap_err();
        assert!(matches!(err, ProviderError::ProviderOverloaded));
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("only one")]);
        provider.invoke(&request("m")).await.unwrap();
        let err = provider.invoke(&request("m")).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn requests_are_captured_for_assertions() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("a"),
            ScriptedReply::text("b"),
        ]);
        provider.invoke(&request("gpt-4o")).await.unwrap();
        provider.invoke(&request("gpt-4o-mini")).await.unwrap();

        let seen = provider.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].model, "gpt-4o");
        assert_eq!(seen[1].model, "gpt-4o-mini");
        assert_eq!(seen[0].instructions, "do the work");
    }
}
