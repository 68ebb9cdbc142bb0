use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::messages::Message;
use crate::thread::Thread;
use crate::tools::{ToolCall, ToolDescriptor};

/// Everything one model round-trip needs: instructions rendered for this
/// turn, the assembled tool descriptors, the conversation thread, and the
/// model name.
#[derive(Clone)]
pub struct InvokeRequest {
    pub instructions: String,
    pub tools: Vec<ToolDescriptor>,
    pub thread: Arc<Thread>,
    pub model: String,
}

/// What the model produced in one round-trip: assistant messages plus the
/// tool invocations it requested. Executing those calls is the caller's
/// job, not the provider's.
#[derive(Clone, Debug, Default)]
pub struct ModelReply {
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
}

/// Trait implemented by each model backend.
///
/// Implementations read the thread's history but never write to it; the
/// engine owns all thread mutation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ModelProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply, ProviderError> {
            let last = request
                .thread
                .history()
                .into_iter()
                .rev()
                .find_map(|m| match m {
                    Message::User(u) => Some(u.content),
                    _ => None,
                })
                .unwrap_or_default();
            Ok(ModelReply {
                messages: vec![Message::assistant(last)],
                tool_calls: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn provider_usable_as_trait_object() {
        let provider: Arc<dyn ModelProvider> = Arc::new(Echo);
        let thread = Arc::new(Thread::new());
        thread.append(Message::user("ping"));

        let request = InvokeRequest {
            instructions: "You are a test.".into(),
            tools: Vec::new(),
            thread,
            model: "echo-1".into(),
        };
        let reply = provider.invoke(&request).await.unwrap();
        assert_eq!(reply.messages.len(), 1);
        assert!(reply.tool_calls.is_empty());
        match &reply.messages[0] {
            Message::Assistant(m) => assert_eq!(m.text_content(), "ping"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
