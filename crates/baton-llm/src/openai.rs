use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use baton_core::errors::ProviderError;
use baton_core::ids::ToolCallId;
use baton_core::messages::{AssistantMessage, Message, StopReason};
use baton_core::provider::{InvokeRequest, ModelProvider, ModelReply};
use baton_core::tools::{ToolCall, ToolDescriptor};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat Completions backend.
///
/// Non-streaming: one POST per round-trip, tool calls come back in the
/// response body and are executed by the engine, not here.
pub struct OpenAiProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key: SecretString::from(api_key.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a different endpoint, e.g. a local proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Read the API key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Self::new(key)),
            _ => Err(ProviderError::AuthenticationFailed(
                "OPENAI_API_KEY is not set".into(),
            )),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Convert an InvokeRequest into the Chat Completions request body.
fn build_request_body(request: &InvokeRequest) -> Value {
    let mut messages: Vec<Value> = vec![json!({
        "role": "system",
        "content": request.instructions,
    })];
    messages.extend(request.thread.history().iter().map(convert_message));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request.tools.iter().map(convert_tool).collect();
        body["tools"] = json!(tools);
    }

    body
}

fn convert_message(msg: &Message) -> Value {
    match msg {
        Message::User(m) => json!({"role": "user", "content": m.content}),
        Message::Assistant(m) => convert_assistant_message(m),
        Message::ToolResult(m) => {
            // The wire format has no error flag on tool results, so mark
            // failures in the content itself.
            let content = if m.is_error {
                format!("[error] {}", m.content)
            } else {
                m.content.clone()
            };
            json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id,
                "content": content,
            })
        }
    }
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    let mut out = json!({"role": "assistant"});
    if let Some(content) = &msg.content {
        out["content"] = json!(content);
    }
    if !msg.tool_calls.is_empty() {
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        // arguments travel as a JSON-encoded string
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        out["tool_calls"] = json!(calls);
    }
    out
}

fn convert_tool(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters_schema,
        }
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn parse_reply(response: ChatResponse) -> Result<ModelReply, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidRequest("response contained no choices".into()))?;

    let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
    for wire in choice.message.tool_calls {
        let arguments = if wire.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&wire.function.arguments).map_err(|e| {
                ProviderError::InvalidRequest(format!(
                    "tool call arguments were not valid JSON: {e}"
                ))
            })?
        };
        tool_calls.push(ToolCall {
            id: ToolCallId::from_raw(wire.id),
            name: wire.function.name,
            arguments,
        });
    }

    let message = AssistantMessage {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls: tool_calls.clone(),
        stop_reason: Some(stop_reason_from_finish(choice.finish_reason.as_deref())),
    };

    Ok(ModelReply {
        messages: vec![Message::Assistant(message)],
        tool_calls,
    })
}

fn stop_reason_from_finish(finish: Option<&str>) -> StopReason {
    match finish {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply, ProviderError> {
        let body = build_request_body(request);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(REQUEST_TIMEOUT)
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            if status == 429 {
                return Err(ProviderError::RateLimited { retry_after });
            }
            return Err(ProviderError::from_status(status, body));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidRequest(format!("malformed response body: {e}")))?;

        parse_reply(parsed)
    }
}
