pub mod agent;
pub mod error;
pub mod flow;
pub mod instructions;
pub mod orchestrator;
pub mod runner;
pub mod toolset;

pub use agent::Agent;
pub use error::EngineError;
pub use flow::{Assistant, Flow};
pub use instructions::{build_instructions, InstructionConfig};
pub use orchestrator::Orchestrator;
pub use runner::{run_task, AgentRunner, RoundTrip, RunnerConfig, TurnRunner};
pub use toolset::{
    complete_tool, end_run_tool, fail_tool, talk_to_human_tool, wrap_with_artifacts, AgentTool,
    FunctionTool, RunControl, SubAgentTool, ToolBuildContext, ToolSet,
};
