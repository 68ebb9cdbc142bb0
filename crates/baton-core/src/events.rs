use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ids::OrchestratorId;

/// Orchestration lifecycle events. Transient and observation-only; they are
/// broadcast to observers and never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum OrchestrationEvent {
    OrchestratorStart {
        orchestrator_id: OrchestratorId,
    },
    OrchestratorEnd {
        orchestrator_id: OrchestratorId,
    },
    OrchestratorError {
        orchestrator_id: OrchestratorId,
        error: String,
    },
    AgentTurnStart {
        orchestrator_id: OrchestratorId,
        agent: String,
    },
    AgentTurnEnd {
        orchestrator_id: OrchestratorId,
        agent: String,
    },
}

impl OrchestrationEvent {
    pub fn orchestrator_id(&self) -> &OrchestratorId {
        match self {
            Self::OrchestratorStart { orchestrator_id }
            | Self::OrchestratorEnd { orchestrator_id }
            | Self::OrchestratorError { orchestrator_id, .. }
            | Self::AgentTurnStart { orchestrator_id, .. }
            | Self::AgentTurnEnd { orchestrator_id, .. } => orchestrator_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrchestratorStart { .. } => "orchestrator-start",
            Self::OrchestratorEnd { .. } => "orchestrator-end",
            Self::OrchestratorError { .. } => "orchestrator-error",
            Self::AgentTurnStart { .. } => "agent-turn-start",
            Self::AgentTurnEnd { .. } => "agent-turn-end",
        }
    }

    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentTurnStart { agent, .. } | Self::AgentTurnEnd { agent, .. } => {
                Some(agent.as_str())
            }
            _ => None,
        }
    }
}

/// Observer boundary for lifecycle events. Implementations must swallow
/// their own failures; a slow or broken sink never aborts orchestration.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: OrchestrationEvent);
}

/// Fans events out to broadcast-channel subscribers.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<OrchestrationEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: OrchestrationEvent) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.tx.send(event);
    }
}

/// Collects events in memory, oldest first. Used by tests and local
/// inspection.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<OrchestrationEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, event: OrchestrationEvent) {
        self.events.lock().push(event);
    }
}
