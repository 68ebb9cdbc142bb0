//! Assistants and flows.
//!
//! An [`Assistant`] is a reusable persona: a name plus optional standing
//! instructions, a preferred model, and tools it always carries. A [`Flow`]
//! binds an assistant to a conversation thread and layers on flow-scoped
//! tools, instructions, and context. Agents borrow the flow for a run; the
//! thread outlives any single agent.

use std::collections::BTreeMap;
use std::sync::Arc;

use baton_core::thread::Thread;
use serde_json::Value;

use crate::toolset::AgentTool;

/// A named assistant persona.
#[derive(Debug, Clone)]
pub struct Assistant {
    pub name: String,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub tools: Vec<AgentTool>,
}

impl Assistant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            model: None,
            tools: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tool(mut self, tool: AgentTool) -> Self {
        self.tools.push(tool);
        self
    }
}

/// An assistant bound to a conversation thread.
///
/// Several agents may run against the same flow in sequence; they all read
/// and append to the shared thread.
#[derive(Debug, Clone)]
pub struct Flow {
    pub assistant: Assistant,
    pub thread: Arc<Thread>,
    pub tools: Vec<AgentTool>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub extra_instructions: Vec<String>,
    pub context: BTreeMap<String, Value>,
}

impl Flow {
    /// Creates a flow around `assistant` with a fresh, empty thread.
    pub fn new(assistant: Assistant) -> Self {
        Self {
            assistant,
            thread: Arc::new(Thread::new()),
            tools: Vec::new(),
            model: None,
            instructions: None,
            extra_instructions: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Appends a one-off instruction line to the flow.
    pub fn add_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.extra_instructions.push(instruction.into());
        self
    }

    pub fn with_tool(mut self, tool: AgentTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Rebinds the flow to an existing thread, e.g. to resume a conversation.
    pub fn with_thread(mut self, thread: Arc<Thread>) -> Self {
        self.thread = thread;
        self
    }
}
