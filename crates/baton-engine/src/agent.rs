//! The agent: a set of tasks bound to a flow, with the logic that turns
//! current task state into per-turn instructions and tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use baton_core::task::{Task, TaskHandle, TaskStatus};
use serde_json::Value;

use crate::flow::Flow;
use crate::instructions::{build_instructions, InstructionConfig};
use crate::runner::RunnerConfig;
use crate::toolset::{
    complete_tool, end_run_tool, fail_tool, talk_to_human_tool, wrap_with_artifacts, AgentTool,
    ToolBuildContext, ToolSet,
};

/// An LLM-backed worker holding the tasks for one run.
///
/// Task membership is fixed at construction; only the statuses inside the
/// tasks change while the run is live.
#[derive(Clone, Debug)]
pub struct Agent {
    pub name: Option<String>,
    pub tasks: Vec<TaskHandle>,
    pub flow: Arc<Flow>,
    pub tools: Vec<AgentTool>,
    pub instructions: Option<String>,
    /// Exposes the `talk_to_human` tool and its guidance.
    pub user_access: bool,
    /// Allows free-text replies addressed to the software that spawned the
    /// agent. Usually set only for sub-agents whose caller reads prose.
    pub system_access: bool,
    pub context: BTreeMap<String, Value>,
}

impl Agent {
    pub fn new(flow: Arc<Flow>) -> Self {
        Self {
            name: None,
            tasks: Vec::new(),
            flow,
            tools: Vec::new(),
            instructions: None,
            user_access: false,
            system_access: false,
            context: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_task<T>(mut self, task: &Task<T>) -> Self {
        self.tasks.push(task.handle());
        self
    }

    pub fn with_tool(mut self, tool: AgentTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_user_access(mut self, user_access: bool) -> Self {
        self.user_access = user_access;
        self
    }

    pub fn with_system_access(mut self, system_access: bool) -> Self {
        self.system_access = system_access;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.flow.assistant.name)
    }

    pub fn tasks(&self) -> &[TaskHandle] {
        &self.tasks
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.tasks.iter().any(|t| t.status() == TaskStatus::Pending)
    }

    /// Results of COMPLETED tasks, in task order. PENDING and FAILED tasks
    /// contribute nothing.
    pub fn completed_results(&self) -> Vec<Value> {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Completed)
            .filter_map(|t| t.result_value())
            .collect()
    }

    /// A lone task on a non-conversational agent ends the run the moment it
    /// resolves; nothing further could be said to the caller anyway.
    pub fn early_end_run(&self) -> bool {
        !self.system_access && self.tasks.len() == 1
    }

    /// Effective model: assistant override, then flow override, then the
    /// configured default.
    pub fn model(&self, config: &RunnerConfig) -> String {
        self.flow
            .assistant
            .model
            .clone()
            .or_else(|| self.flow.model.clone())
            .unwrap_or_else(|| config.default_model.clone())
    }

    /// Renders this turn's instructions from current task and context state.
    pub fn build_instructions(&self, extra_context: &BTreeMap<String, Value>) -> String {
        let mut context = self.flow.context.clone();
        context.extend(self.context.clone());
        context.extend(extra_context.clone());

        build_instructions(&InstructionConfig {
            assistant_instructions: self.flow.assistant.instructions.as_deref(),
            flow_instructions: self.flow.instructions.as_deref(),
            agent_instructions: self.instructions.as_deref(),
            extra_instructions: &self.flow.extra_instructions,
            tasks: &self.tasks,
            system_access: self.system_access,
            user_access: self.user_access,
            context: &context,
        })
    }

    /// Assembles this turn's tool list.
    pub fn build_tools(&self, build: &ToolBuildContext) -> ToolSet {
        let mut tools: Vec<AgentTool> = Vec::new();

        // 1. Flow tools, then agent tools, then assistant tools
        tools.extend(self.flow.tools.iter().cloned());
        tools.extend(self.tools.iter().cloned());
        tools.extend(self.flow.assistant.tools.iter().cloned());

        // 2. Agents without tasks get a manual way out
        if self.tasks.is_empty() {
            tools.push(AgentTool::Function(end_run_tool(&build.control)));
        }

        // 3. Completion pair per task, numbered in list order
        let early_end_run = self.early_end_run();
        for (index, task) in self.tasks.iter().enumerate() {
            tools.push(AgentTool::Function(complete_tool(
                index + 1,
                task,
                early_end_run,
                &build.control,
            )));
            tools.push(AgentTool::Function(fail_tool(
                index + 1,
                task,
                early_end_run,
                &build.control,
            )));
        }

        // 4. Human channel
        if self.user_access {
            match &build.human {
                Some(channel) => tools.push(AgentTool::Function(talk_to_human_tool(channel))),
                None => tracing::warn!(
                    agent = %self.name(),
                    "user_access is set but no human channel is configured"
                ),
            }
        }

        // 5. Route every local call through the artifact trail
        let tools = tools
            .into_iter()
            .map(|tool| match tool {
                AgentTool::Function(inner) => AgentTool::Function(wrap_with_artifacts(
                    inner,
                    &build.artifacts,
                    &build.correlation_id,
                )),
                other => other,
            })
            .collect();

        ToolSet::new(tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Assistant;
    use crate::toolset::RunControl;
    use baton_core::artifacts::{ArtifactSink, NullArtifactSink};
    use baton_core::human::{HumanChannel, ScriptedHuman};
    use serde_json::json;

    fn build_context() -> ToolBuildContext {
        ToolBuildContext {
            control: Arc::new(RunControl::new()),
            artifacts: Arc::new(NullArtifactSink) as Arc<dyn ArtifactSink>,
            correlation_id: "turn_test".to_string(),
            human: None,
        }
    }

    fn tool_names(tools: &ToolSet) -> Vec<String> {
        tools.descriptors().into_iter().map(|d| d.name).collect()
    }

    #[test]
    fn name_override_beats_assistant_name() {
        let flow = Arc::new(Flow::new(Assistant::new("Marvin")));
        assert_eq!(Agent::new(Arc::clone(&flow)).name(), "Marvin");
        assert_eq!(Agent::new(flow).with_name("researcher").name(), "researcher");
    }

    #[test]
    fn model_resolution_precedence() {
        let config = RunnerConfig::default();

        let plain = Arc::new(Flow::new(Assistant::new("a")));
        assert_eq!(Agent::new(plain).model(&config), config.default_model);

        let flow_model = Arc::new(Flow::new(Assistant::new("a")).with_model("flow-model"));
        assert_eq!(Agent::new(flow_model).model(&config), "flow-model");

        let assistant_model = Arc::new(
            Flow::new(Assistant::new("a").with_model("assistant-model")).with_model("flow-model"),
        );
        assert_eq!(Agent::new(assistant_model).model(&config), "assistant-model");
    }

    #[test]
    fn early_end_run_needs_exactly_one_task_and_no_system_access() {
        let flow = Arc::new(Flow::new(Assistant::new("a")));
        let one: Task<i64> = Task::new("t1");
        let two: Task<i64> = Task::new("t2");

        let single = Agent::new(Arc::clone(&flow)).with_task(&one);
        assert!(single.early_end_run());

        let double = Agent::new(Arc::clone(&flow)).with_task(&one).with_task(&two);
        assert!(!double.early_end_run());

        let conversational = Agent::new(flow).with_task(&one).with_system_access(true);
        assert!(!conversational.early_end_run());
    }

    #[test]
    fn zero_task_agent_gets_end_run_tool() {
        let flow = Arc::new(Flow::new(Assistant::new("a")));
        let tools = Agent::new(flow).build_tools(&build_context());
        assert_eq!(tool_names(&tools), vec!["end_run"]);
    }

    #[test]
    fn task_tools_are_numbered_pairs_in_order() {
        let flow = Arc::new(Flow::new(Assistant::new("a")));
        let one: Task<i64> = Task::new("t1");
        let two: Task<String> = Task::new("t2");
        let agent = Agent::new(flow).with_task(&one).with_task(&two);

        let tools = agent.build_tools(&build_context());
        assert_eq!(
            tool_names(&tools),
            vec![
                "complete_task_1",
                "fail_task_1",
                "complete_task_2",
                "fail_task_2"
            ]
        );
    }

    #[test]
    fn user_access_appends_talk_to_human_when_channel_present() {
        let flow = Arc::new(Flow::new(Assistant::new("a")));
        let task: Task<i64> = Task::new("t1");

        let mut build = build_context();
        build.human = Some(Arc::new(ScriptedHuman::new()) as Arc<dyn HumanChannel>);
        let agent = Agent::new(Arc::clone(&flow)).with_task(&task).with_user_access(true);
        let names = tool_names(&agent.build_tools(&build));
        assert_eq!(names.last().map(String::as_str), Some("talk_to_human"));

        // without a channel the tool is simply absent
        let agent = Agent::new(flow).with_task(&task).with_user_access(true);
        let names = tool_names(&agent.build_tools(&build_context()));
        assert!(!names.contains(&"talk_to_human".to_string()));
    }

    #[test]
    fn completed_results_keep_task_order_and_skip_failures() {
        let flow = Arc::new(Flow::new(Assistant::new("a")));
        let first: Task<i64> = Task::new("t1");
        let second: Task<i64> = Task::new("t2");
        let third: Task<i64> = Task::new("t3");
        let agent = Agent::new(flow)
            .with_task(&first)
            .with_task(&second)
            .with_task(&third);

        second.handle().fail("impossible").unwrap();
        third.handle().complete(json!(3)).unwrap();
        first.handle().complete(json!(1)).unwrap();

        assert_eq!(agent.completed_results(), vec![json!(1), json!(3)]);
        assert!(!agent.has_pending_tasks());
    }

    #[test]
    fn context_merging_prefers_agent_then_extra() {
        let flow = Arc::new(
            Flow::new(Assistant::new("a"))
                .with_context("shared", json!("flow"))
                .with_context("flow_only", json!(true)),
        );
        let agent = Agent::new(flow)
            .with_context("shared", json!("agent"))
            .with_context("agent_only", json!(true));

        let mut extra = BTreeMap::new();
        extra.insert("shared".to_string(), json!("extra"));

        let text = agent.build_instructions(&extra);
        assert!(text.contains(r#"- shared: "extra""#));
        assert!(text.contains("- flow_only: true"));
        assert!(text.contains("- agent_only: true"));
    }

    #[test]
    fn instruction_sources_stack_from_all_levels() {
        let flow = Arc::new(
            Flow::new(Assistant::new("a").with_instructions("Be factual."))
                .with_instructions("Stay on topic.")
                .add_instruction("Answer in French."),
        );
        let agent = Agent::new(flow).with_instructions("Be brief.");
        let text = agent.build_instructions(&BTreeMap::new());
        assert!(text.contains(
            "- Be factual.\n- Stay on topic.\n- Be brief.\n- Answer in French."
        ));
    }
}
