//! Tool variants, assembly context, and the built-in tool factories.
//!
//! Tools come in three shapes, resolved once at assembly time into an
//! explicit [`AgentTool`] variant: a locally executed function, a sub-agent
//! the model can converse with, and a bare descriptor for tools the provider
//! executes on its side. The engine dispatches on the variant, never on the
//! runtime shape of a callable.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use baton_core::artifacts::{Artifact, ArtifactSink};
use baton_core::human::HumanChannel;
use baton_core::messages::Message;
use baton_core::provider::ModelProvider;
use baton_core::task::TaskHandle;
use baton_core::thread::Thread;
use baton_core::tools::{ToolCall, ToolDescriptor, ToolError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::flow::{Assistant, Flow};
use crate::runner::{RunnerConfig, TurnRunner};

const SUBAGENT_GUIDANCE: &str = include_str!("../prompts/subagent_tool.txt");

/// Shared run-termination flag. Tools set it; the run loop polls it between
/// round-trips. There is no mid-round-trip cancellation.
#[derive(Debug, Default)]
pub struct RunControl {
    end_run: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_end(&self) {
        self.end_run.store(true, Ordering::Release);
    }

    pub fn should_end(&self) -> bool {
        self.end_run.load(Ordering::Acquire)
    }
}

/// Everything tool assembly needs besides the agent itself. Captured
/// explicitly per turn so no tool closes over loop variables.
#[derive(Clone)]
pub struct ToolBuildContext {
    pub control: Arc<RunControl>,
    pub artifacts: Arc<dyn ArtifactSink>,
    pub correlation_id: String,
    pub human: Option<Arc<dyn HumanChannel>>,
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// A locally executed tool: a descriptor plus an async handler.
#[derive(Clone)]
pub struct FunctionTool {
    descriptor: ToolDescriptor,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            handler: Arc::new(handler),
        }
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.handler)(arguments).await
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.descriptor.name)
            .finish()
    }
}

/// A tool that forwards a message to another assistant running on its own
/// thread. The thread is created once, so repeated calls continue one
/// conversation.
#[derive(Clone)]
pub struct SubAgentTool {
    descriptor: ToolDescriptor,
    assistant: Assistant,
    thread: Arc<Thread>,
    provider: Arc<dyn ModelProvider>,
    artifacts: Arc<dyn ArtifactSink>,
    config: RunnerConfig,
}

#[derive(Deserialize)]
struct SubAgentArgs {
    message: String,
}

impl SubAgentTool {
    pub fn new(
        assistant: Assistant,
        provider: Arc<dyn ModelProvider>,
        artifacts: Arc<dyn ArtifactSink>,
        config: RunnerConfig,
    ) -> Self {
        let name = format!("call_ai_{}", sanitize_name(&assistant.name));
        let description = format!(
            "{}\n\n## Sub-AI Details\n\n- Name: {}\n- Instructions: {}",
            SUBAGENT_GUIDANCE.trim_end(),
            assistant.name,
            assistant.instructions.as_deref().unwrap_or("(none provided)"),
        );
        let descriptor = ToolDescriptor::new(
            name,
            description,
            json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to send to the sub-AI."
                    }
                },
                "required": ["message"]
            }),
        );
        Self {
            descriptor,
            assistant,
            thread: Arc::new(Thread::new()),
            provider,
            artifacts,
            config,
        }
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Appends the message to the sub-agent's thread, runs one turn with
    /// free-text responses allowed, and returns that turn's messages.
    ///
    /// Boxed because a sub-agent's own tool set may contain further
    /// sub-agents.
    pub fn call(&self, arguments: Value) -> BoxFuture<'static, Result<Value, ToolError>> {
        let tool = self.clone();
        async move {
            let args: SubAgentArgs = serde_json::from_value(arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
            tool.thread.append(Message::user(args.message));

            let flow = Flow::new(tool.assistant.clone()).with_thread(Arc::clone(&tool.thread));
            let agent = Agent::new(Arc::new(flow)).with_system_access(true);
            let runner = TurnRunner::new(
                Arc::clone(&tool.provider),
                Arc::clone(&tool.artifacts),
                tool.config.clone(),
            );
            let control = Arc::new(RunControl::new());
            let trip = runner
                .run_turn(&agent, &control)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            serde_json::to_value(&trip.messages)
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))
        }
        .boxed()
    }
}

impl fmt::Debug for SubAgentTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubAgentTool")
            .field("name", &self.descriptor.name)
            .field("assistant", &self.assistant.name)
            .finish()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// The three tool shapes an agent can carry.
#[derive(Clone, Debug)]
pub enum AgentTool {
    Function(FunctionTool),
    SubAgent(SubAgentTool),
    /// Advertised to the model but executed on the provider's side.
    Descriptor(ToolDescriptor),
}

impl AgentTool {
    pub fn descriptor(&self) -> &ToolDescriptor {
        match self {
            Self::Function(tool) => tool.descriptor(),
            Self::SubAgent(tool) => tool.descriptor(),
            Self::Descriptor(descriptor) => descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// An assembled, ordered tool list for one turn.
pub struct ToolSet {
    tools: Vec<AgentTool>,
}

impl ToolSet {
    pub fn new(tools: Vec<AgentTool>) -> Self {
        Self { tools }
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&AgentTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs one tool call requested by the model. Every failure comes back
    /// as a `ToolError` for the caller to report to the model; nothing here
    /// aborts the turn.
    pub async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let Some(tool) = self.find(&call.name) else {
            return Err(ToolError::ExecutionFailed(format!(
                "unknown tool: {}",
                call.name
            )));
        };
        match tool {
            AgentTool::Function(tool) => tool.call(call.arguments.clone()).await,
            AgentTool::SubAgent(tool) => tool.call(call.arguments.clone()).await,
            AgentTool::Descriptor(descriptor) => Err(ToolError::ExecutionFailed(format!(
                "tool '{}' is executed by the model provider, not locally",
                descriptor.name
            ))),
        }
    }
}

#[derive(Deserialize)]
struct CompleteArgs {
    result: Value,
}

#[derive(Deserialize)]
struct FailArgs {
    error: String,
}

#[derive(Deserialize)]
struct TalkArgs {
    message: String,
    #[serde(default = "default_true")]
    get_response: bool,
}

fn default_true() -> bool {
    true
}

/// Tool that resolves task `number` as COMPLETED. Validation failures leave
/// the task untouched and, when `end_run` is set, do not end the run.
pub fn complete_tool(
    number: usize,
    task: &TaskHandle,
    end_run: bool,
    control: &Arc<RunControl>,
) -> FunctionTool {
    let descriptor = ToolDescriptor::new(
        format!("complete_task_{number}"),
        format!("Mark task {number} as COMPLETED and record its result."),
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "description": "The result value for the task. Must match the task's declared result type."
                }
            },
            "required": ["result"]
        }),
    );
    let task = task.clone();
    let control = Arc::clone(control);
    FunctionTool::new(descriptor, move |arguments| {
        let task = task.clone();
        let control = Arc::clone(&control);
        async move {
            let args: CompleteArgs = serde_json::from_value(arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
            task.complete(args.result)?;
            if end_run {
                control.signal_end();
            }
            Ok(json!(format!("Task {number} marked COMPLETED.")))
        }
        .boxed()
    })
}

/// Tool that resolves task `number` as FAILED with an explanation.
pub fn fail_tool(
    number: usize,
    task: &TaskHandle,
    end_run: bool,
    control: &Arc<RunControl>,
) -> FunctionTool {
    let descriptor = ToolDescriptor::new(
        format!("fail_task_{number}"),
        format!("Mark task {number} as FAILED and record a brief explanation."),
        json!({
            "type": "object",
            "properties": {
                "error": {
                    "type": "string",
                    "description": "A brief explanation of why the task cannot be completed."
                }
            },
            "required": ["error"]
        }),
    );
    let task = task.clone();
    let control = Arc::clone(control);
    FunctionTool::new(descriptor, move |arguments| {
        let task = task.clone();
        let control = Arc::clone(&control);
        async move {
            let args: FailArgs = serde_json::from_value(arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
            task.fail(args.error)?;
            if end_run {
                control.signal_end();
            }
            Ok(json!(format!("Task {number} marked FAILED.")))
        }
        .boxed()
    })
}

/// Tool that ends the run outright. Offered when an agent has no tasks.
pub fn end_run_tool(control: &Arc<RunControl>) -> FunctionTool {
    let descriptor = ToolDescriptor::new(
        "end_run",
        "Use this tool to end the run.",
        json!({"type": "object", "properties": {}}),
    );
    let control = Arc::clone(control);
    FunctionTool::new(descriptor, move |_arguments| {
        let control = Arc::clone(&control);
        async move {
            control.signal_end();
            Ok(json!("Run ended."))
        }
        .boxed()
    })
}

/// Tool that relays a message to the human channel and optionally waits for
/// the reply.
pub fn talk_to_human_tool(channel: &Arc<dyn HumanChannel>) -> FunctionTool {
    let descriptor = ToolDescriptor::new(
        "talk_to_human",
        "Send a message to the human user and optionally wait for a response. If `get_response` \
         is true, the tool returns the user's response, otherwise it returns a simple \
         confirmation.",
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to show the user."
                },
                "get_response": {
                    "type": "boolean",
                    "description": "Wait for and return the user's reply.",
                    "default": true
                }
            },
            "required": ["message"]
        }),
    );
    let channel = Arc::clone(channel);
    FunctionTool::new(descriptor, move |arguments| {
        let channel = Arc::clone(&channel);
        async move {
            let args: TalkArgs = serde_json::from_value(arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
            let reply = channel.prompt(&args.message, args.get_response).await?;
            if args.get_response {
                Ok(Value::String(reply))
            } else {
                Ok(Value::String("Message sent to user".to_string()))
            }
        }
        .boxed()
    })
}

/// Wraps a function tool so each successful call is also recorded as a
/// markdown artifact. Arguments, result, and errors pass through unchanged.
pub fn wrap_with_artifacts(
    tool: FunctionTool,
    artifacts: &Arc<dyn ArtifactSink>,
    correlation_id: &str,
) -> FunctionTool {
    let artifacts = Arc::clone(artifacts);
    let correlation_id = correlation_id.to_string();
    let inner = tool.clone();
    FunctionTool::new(tool.descriptor().clone(), move |arguments| {
        let inner = inner.clone();
        let artifacts = Arc::clone(&artifacts);
        let correlation_id = correlation_id.clone();
        async move {
            let result = inner.call(arguments.clone()).await?;
            let args_pretty =
                serde_json::to_string_pretty(&arguments).unwrap_or_else(|_| arguments.to_string());
            let result_pretty =
                serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
            let descriptor = inner.descriptor();
            artifacts.record(Artifact::markdown(
                "result",
                format!(
                    "## Tool call: {}\n\n**Description:** {}\n\n## Arguments\n\n```json\n{}\n```\n\n### Result\n\n```json\n{}\n```",
                    descriptor.name, descriptor.description, args_pretty, result_pretty
                ),
                format!("Result of the `{}` tool call", descriptor.name),
                correlation_id,
            ));
            Ok(result)
        }
        .boxed()
    })
}
