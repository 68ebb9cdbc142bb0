use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};
use tracing::info;

use baton_core::artifacts::{ArtifactSink, MemoryArtifactSink};
use baton_core::human::ConsoleHuman;
use baton_core::provider::ModelProvider;
use baton_core::task::{Task, TaskStatus};
use baton_engine::{run_task, Agent, AgentRunner, Assistant, Flow, RunnerConfig, TurnRunner};
use baton_llm::{
    ExclusiveProvider, OpenAiProvider, ReliableProvider, ScriptedProvider, ScriptedReply,
};
use baton_store::{Database, SqliteArtifactSink};

#[derive(Parser)]
#[command(name = "baton")]
#[command(about = "Run an objective through the agent turn loop")]
struct Args {
    /// Objective for the task the agent must resolve.
    #[arg(long, default_value = "Sum 2 and 3")]
    objective: String,

    /// Model to request when neither assistant nor flow names one.
    #[arg(long)]
    model: Option<String>,

    /// Maximum turns after the entry turn.
    #[arg(long, default_value = "10")]
    max_iterations: u32,

    /// Persist artifacts to this SQLite file instead of memory.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Allow the agent to talk to you through the terminal.
    #[arg(long)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = RunnerConfig {
        max_agent_iterations: args.max_iterations,
        ..RunnerConfig::default()
    };
    if let Some(model) = &args.model {
        config.default_model = model.clone();
    }

    let provider: Arc<dyn ModelProvider> = match OpenAiProvider::from_env() {
        Ok(openai) => {
            info!("using the OpenAI backend");
            Arc::new(ExclusiveProvider::new(ReliableProvider::with_defaults(
                openai,
            )))
        }
        Err(_) => {
            info!("OPENAI_API_KEY not set, replaying a scripted run");
            Arc::new(ExclusiveProvider::new(scripted_run()))
        }
    };

    let artifacts: Arc<dyn ArtifactSink> = match &args.db {
        Some(path) => {
            let db = Database::open(path)?;
            Arc::new(SqliteArtifactSink::new(db))
        }
        None => Arc::new(MemoryArtifactSink::new()),
    };

    let flow = Arc::new(Flow::new(Assistant::new("baton")));

    if args.interactive {
        let task: Task<Value> = Task::new(&args.objective);
        let agent = Agent::new(flow).with_task(&task).with_user_access(true);
        let runner = AgentRunner::new(
            TurnRunner::new(provider, artifacts, config).with_human(Arc::new(ConsoleHuman)),
        );
        runner.run(&agent).await?;

        match task.status() {
            TaskStatus::Completed => println!("{}", task.result().unwrap_or(Value::Null)),
            TaskStatus::Failed => {
                anyhow::bail!("task failed: {}", task.error().unwrap_or_default())
            }
            TaskStatus::Pending => println!("turn budget exhausted before the task resolved"),
        }
    } else {
        match run_task::<Value>(&args.objective, flow, provider, artifacts, config).await? {
            Some(result) => println!("{result}"),
            None => println!("turn budget exhausted before the task resolved"),
        }
    }

    Ok(())
}

/// Offline stand-in: resolves task 1 in one turn.
fn scripted_run() -> ScriptedProvider {
    ScriptedProvider::new(vec![ScriptedReply::tool_call(
        "complete_task_1",
        json!({"result": 5}),
    )])
}
