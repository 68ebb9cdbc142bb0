//! Multi-agent turn sequencing with lifecycle events.

use baton_core::events::{EventSink, OrchestrationEvent};
use baton_core::ids::OrchestratorId;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, instrument};

use crate::agent::Agent;
use crate::error::EngineError;
use crate::runner::AgentRunner;

/// Sequences agent turns and publishes lifecycle events around the whole
/// run and around each agent's turn.
///
/// Event emission is fire-and-continue; a slow or failing sink is the sink's
/// problem, never the loop's.
pub struct Orchestrator {
    id: OrchestratorId,
    runner: AgentRunner,
    events: Arc<dyn EventSink>,
    propagate_errors: bool,
}

impl Orchestrator {
    pub fn new(runner: AgentRunner, events: Arc<dyn EventSink>) -> Self {
        Self {
            id: OrchestratorId::new(),
            runner,
            events,
            propagate_errors: false,
        }
    }

    /// Makes an agent failure abort the remaining agents and surface as an
    /// error. Off by default; siblings normally keep their turns.
    pub fn with_propagate_errors(mut self, propagate_errors: bool) -> Self {
        self.propagate_errors = propagate_errors;
        self
    }

    pub fn id(&self) -> &OrchestratorId {
        &self.id
    }

    /// Gives each agent one run, in order. Returns per-agent result lists;
    /// a failed agent contributes whatever its tasks had completed before
    /// the failure.
    #[instrument(skip(self, agents), fields(orchestrator_id = %self.id, agents = agents.len()))]
    pub async fn run(&self, agents: &[Agent]) -> Result<Vec<Vec<Value>>, EngineError> {
        self.events.publish(OrchestrationEvent::OrchestratorStart {
            orchestrator_id: self.id.clone(),
        });

        let mut all_results = Vec::with_capacity(agents.len());
        for agent in agents {
            self.events.publish(OrchestrationEvent::AgentTurnStart {
                orchestrator_id: self.id.clone(),
                agent: agent.name().to_string(),
            });

            match self.runner.run(agent).await {
                Ok(results) => {
                    all_results.push(results);
                    self.events.publish(OrchestrationEvent::AgentTurnEnd {
                        orchestrator_id: self.id.clone(),
                        agent: agent.name().to_string(),
                    });
                }
                Err(e) => {
                    error!(agent = %agent.name(), error = %e, "agent turn failed");
                    self.events.publish(OrchestrationEvent::OrchestratorError {
                        orchestrator_id: self.id.clone(),
                        error: e.to_string(),
                    });
                    all_results.push(agent.completed_results());
                    if self.propagate_errors {
                        self.events.publish(OrchestrationEvent::OrchestratorEnd {
                            orchestrator_id: self.id.clone(),
                        });
                        return Err(e);
                    }
                }
            }
        }

        self.events.publish(OrchestrationEvent::OrchestratorEnd {
            orchestrator_id: self.id.clone(),
        });
        Ok(all_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Assistant, Flow};
    use crate::runner::{RunnerConfig, TurnRunner};
    use baton_core::artifacts::{ArtifactSink, MemoryArtifactSink};
    use baton_core::errors::ProviderError;
    use baton_core::events::MemoryEventSink;
    use baton_core::provider::ModelProvider;
    use baton_core::task::{Task, TaskStatus};
    use baton_llm::scripted::{ScriptedProvider, ScriptedReply};
    use serde_json::json;

    fn orchestrator(
        provider: &Arc<ScriptedProvider>,
        events: &Arc<MemoryEventSink>,
    ) -> Orchestrator {
        let runner = AgentRunner::new(TurnRunner::new(
            Arc::clone(provider) as Arc<dyn ModelProvider>,
            Arc::new(MemoryArtifactSink::new()) as Arc<dyn ArtifactSink>,
            RunnerConfig::default(),
        ));
        Orchestrator::new(runner, Arc::clone(events) as Arc<dyn EventSink>)
    }

    fn agent_with_task(task: &Task<i64>) -> Agent {
        let flow = Arc::new(Flow::new(Assistant::new("worker")));
        Agent::new(flow).with_task(task)
    }

    #[tokio::test]
    async fn events_bracket_each_agent_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::tool_call("complete_task_1", json!({"result": 5})),
            ScriptedReply::tool_call("complete_task_1", json!({"result": 7})),
        ]));
        let events = Arc::new(MemoryEventSink::new());
        let orchestrator = orchestrator(&provider, &events);

        let first: Task<i64> = Task::new("sum 2 and 3");
        let second: Task<i64> = Task::new("sum 3 and 4");
        let agents = vec![agent_with_task(&first), agent_with_task(&second)];

        let results = orchestrator.run(&agents).await.unwrap();

        assert_eq!(results, vec![vec![json!(5)], vec![json!(7)]]);
        assert_eq!(
            events.event_types(),
            vec![
                "orchestrator-start",
                "agent-turn-start",
                "agent-turn-end",
                "agent-turn-start",
                "agent-turn-end",
                "orchestrator-end",
            ]
        );
        assert!(events
            .events()
            .iter()
            .all(|e| e.orchestrator_id() == orchestrator.id()));
    }

    #[tokio::test]
    async fn agent_failure_is_reported_but_not_fatal_to_siblings() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::error(ProviderError::ProviderOverloaded),
            ScriptedReply::tool_call("complete_task_1", json!({"result": 7})),
        ]));
        let events = Arc::new(MemoryEventSink::new());
        let orchestrator = orchestrator(&provider, &events);

        let first: Task<i64> = Task::new("sum 2 and 3");
        let second: Task<i64> = Task::new("sum 3 and 4");
        let agents = vec![agent_with_task(&first), agent_with_task(&second)];

        let results = orchestrator.run(&agents).await.unwrap();

        assert_eq!(results, vec![vec![], vec![json!(7)]]);
        assert_eq!(first.status(), TaskStatus::Pending);
        assert_eq!(second.status(), TaskStatus::Completed);
        assert_eq!(
            events.event_types(),
            vec![
                "orchestrator-start",
                "agent-turn-start",
                "orchestrator-error",
                "agent-turn-start",
                "agent-turn-end",
                "orchestrator-end",
            ]
        );
    }

    #[tokio::test]
    async fn propagated_failure_aborts_remaining_agents() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedReply::error(
            ProviderError::ProviderOverloaded,
        )]));
        let events = Arc::new(MemoryEventSink::new());
        let orchestrator = orchestrator(&provider, &events).with_propagate_errors(true);

        let first: Task<i64> = Task::new("sum 2 and 3");
        let second: Task<i64> = Task::new("sum 3 and 4");
        let agents = vec![agent_with_task(&first), agent_with_task(&second)];

        let err = orchestrator.run(&agents).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));
        // the second agent never started, and the end event still fired
        assert_eq!(
            events.event_types(),
            vec![
                "orchestrator-start",
                "agent-turn-start",
                "orchestrator-error",
                "orchestrator-end",
            ]
        );
        assert_eq!(second.status(), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn failing_agent_contributes_partial_results() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::tool_call("complete_task_1", json!({"result": 5})),
            ScriptedReply::error(ProviderError::ProviderOverloaded),
        ]));
        let events = Arc::new(MemoryEventSink::new());
        let orchestrator = orchestrator(&provider, &events);

        let done: Task<i64> = Task::new("sum 2 and 3");
        let stuck: Task<i64> = Task::new("sum 3 and 4");
        let flow = Arc::new(Flow::new(Assistant::new("worker")));
        let agents = vec![Agent::new(flow).with_task(&done).with_task(&stuck)];

        let results = orchestrator.run(&agents).await.unwrap();

        assert_eq!(results, vec![vec![json!(5)]]);
        assert_eq!(done.status(), TaskStatus::Completed);
        assert_eq!(stuck.status(), TaskStatus::Pending);
        assert_eq!(
            events.event_types(),
            vec![
                "orchestrator-start",
                "agent-turn-start",
                "orchestrator-error",
                "orchestrator-end",
            ]
        );
    }
}
