//! Turn execution and the agent run loop.
//!
//! A turn is exactly one provider round-trip: instructions and tools are
//! rebuilt from current task state, the model replies, and any tool calls it
//! made are executed locally with their results appended to the thread. The
//! [`AgentRunner`] repeats turns until the agent's tasks resolve, a tool ends
//! the run, or the iteration budget runs out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use baton_core::artifacts::{Artifact, ArtifactSink};
use baton_core::human::HumanChannel;
use baton_core::ids::TurnId;
use baton_core::messages::Message;
use baton_core::provider::{InvokeRequest, ModelProvider, ModelReply};
use baton_core::task::{Task, TaskStatus};
use baton_core::tools::ActionRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::agent::Agent;
use crate::error::EngineError;
use crate::flow::Flow;
use crate::toolset::{RunControl, ToolBuildContext};

/// Process-level defaults for agent runs.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Model used when neither assistant nor flow overrides it.
    pub default_model: String,
    /// Repeat turns allowed after the unconditional entry turn.
    pub max_agent_iterations: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".to_string(),
            max_agent_iterations: 10,
        }
    }
}

/// Transcript of one completed turn.
#[derive(Debug)]
pub struct RoundTrip {
    pub turn_id: TurnId,
    /// Messages produced during this turn, model replies and tool results.
    pub messages: Vec<Message>,
    pub actions: Vec<ActionRecord>,
}

/// Runs a single turn: rebuild instructions and tools, invoke the model,
/// execute its tool calls, record the transcripts.
pub struct TurnRunner {
    provider: Arc<dyn ModelProvider>,
    artifacts: Arc<dyn ArtifactSink>,
    human: Option<Arc<dyn HumanChannel>>,
    config: RunnerConfig,
}

impl TurnRunner {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        artifacts: Arc<dyn ArtifactSink>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            provider,
            artifacts,
            human: None,
            config,
        }
    }

    pub fn with_human(mut self, human: Arc<dyn HumanChannel>) -> Self {
        self.human = Some(human);
        self
    }

    #[instrument(skip(self, agent, control), fields(agent = %agent.name()))]
    pub async fn run_turn(
        &self,
        agent: &Agent,
        control: &Arc<RunControl>,
    ) -> Result<RoundTrip, EngineError> {
        // 1. Mint the turn id, resolve model and thread
        let turn_id = TurnId::new();
        let model = agent.model(&self.config);
        let thread = Arc::clone(&agent.flow.thread);

        // 2. Rebuild instructions and tools from current task state
        let instructions = agent.build_instructions(&BTreeMap::new());
        let tools = agent.build_tools(&ToolBuildContext {
            control: Arc::clone(control),
            artifacts: Arc::clone(&self.artifacts),
            correlation_id: turn_id.to_string(),
            human: self.human.clone(),
        });

        // 3. One model round-trip
        let request = InvokeRequest {
            instructions,
            tools: tools.descriptors(),
            thread: Arc::clone(&thread),
            model,
        };
        let ModelReply { messages, tool_calls } = self.provider.invoke(&request).await?;

        // 4. The model's messages join the thread and the turn transcript
        let mut turn_messages = messages.clone();
        thread.extend(messages);

        // 5. Execute requested tool calls locally, feeding results back into
        //    the thread for the next turn
        let mut actions = Vec::new();
        for call in &tool_calls {
            self.artifacts.record(Artifact::json(
                "arguments",
                call.arguments.clone(),
                format!("Arguments for the `{}` tool", call.name),
                turn_id.to_string(),
            ));

            let started = Instant::now();
            let outcome = tools.execute(call).await;
            let duration = started.elapsed();

            let (output, is_error) = match outcome {
                Ok(value) => (value, false),
                Err(e) => (Value::String(e.to_string()), true),
            };
            let content = match &output {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let message = if is_error {
                Message::tool_error(call.id.clone(), content)
            } else {
                Message::tool_result(call.id.clone(), content)
            };
            thread.append(message.clone());
            turn_messages.push(message);

            actions.push(ActionRecord {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
                output,
                is_error,
                duration,
            });
        }

        // 6. Record the turn transcripts
        let messages_payload = serde_json::to_value(&turn_messages)
            .map_err(|e| EngineError::Internal(format!("failed to serialize messages: {e}")))?;
        self.artifacts.record(Artifact::json(
            "messages",
            messages_payload,
            "All messages sent and received during the run.",
            turn_id.to_string(),
        ));
        let actions_payload = serde_json::to_value(&actions)
            .map_err(|e| EngineError::Internal(format!("failed to serialize actions: {e}")))?;
        self.artifacts.record(Artifact::json(
            "actions",
            actions_payload,
            "All actions taken by the assistant during the run.",
            turn_id.to_string(),
        ));

        Ok(RoundTrip {
            turn_id,
            messages: turn_messages,
            actions,
        })
    }
}

/// Drives one agent through repeated turns until it is done.
pub struct AgentRunner {
    turn_runner: TurnRunner,
}

impl AgentRunner {
    pub fn new(turn_runner: TurnRunner) -> Self {
        Self { turn_runner }
    }

    /// Runs the agent and returns the results of its COMPLETED tasks in task
    /// order. Tasks left PENDING or FAILED contribute nothing here but stay
    /// inspectable through the task objects.
    #[instrument(skip(self, agent), fields(agent = %agent.name()))]
    pub async fn run(&self, agent: &Agent) -> Result<Vec<Value>, EngineError> {
        let control = Arc::new(RunControl::new());

        // 1. Entry turn, unconditional
        self.turn_runner.run_turn(agent, &control).await?;

        // 2. Non-conversational agents keep turning while work remains and
        //    the budget holds. Conversational agents stop after one turn;
        //    whoever spawned them reads the reply and drives continuation.
        //    The end-run flag is only consulted here, between round-trips.
        if !agent.system_access {
            let mut iterations = 0u32;
            while !control.should_end()
                && agent.has_pending_tasks()
                && iterations < self.turn_runner.config.max_agent_iterations
            {
                self.turn_runner.run_turn(agent, &control).await?;
                iterations += 1;
            }
        }

        Ok(agent.completed_results())
    }
}

/// Declares a single typed task, runs an agent over it, and interprets the
/// outcome.
///
/// Returns `Ok(Some(result))` when the task completed, an error when the
/// model marked it failed, and `Ok(None)` when the iteration budget ran out
/// with the task still pending. A non-error return is not proof of success;
/// callers must handle `None`.
pub async fn run_task<T>(
    objective: impl Into<String>,
    flow: Arc<Flow>,
    provider: Arc<dyn ModelProvider>,
    artifacts: Arc<dyn ArtifactSink>,
    config: RunnerConfig,
) -> Result<Option<T>, EngineError>
where
    T: Serialize + DeserializeOwned + 'static,
{
    let task: Task<T> = Task::new(objective);
    let agent = Agent::new(flow).with_task(&task);
    let runner = AgentRunner::new(TurnRunner::new(provider, artifacts, config));
    runner.run(&agent).await?;

    match task.status() {
        TaskStatus::Completed => Ok(task.result()),
        TaskStatus::Failed => Err(EngineError::TaskFailed {
            error: task.error().unwrap_or_default(),
        }),
        TaskStatus::Pending => Ok(None),
    }
}
