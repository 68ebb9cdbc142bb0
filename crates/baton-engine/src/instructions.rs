//! Per-turn instruction rendering.
//!
//! Instructions are rebuilt from scratch before every model round-trip so
//! they always reflect current task state. Rendering is a plain function
//! over an explicit configuration record; every branch is driven by a field
//! of that record, never by ambient state.

use std::collections::BTreeMap;

use baton_core::task::{TaskHandle, TaskStatus};
use serde_json::Value;

const INTRO: &str = include_str!("../prompts/intro.txt");
const TASK_GUIDANCE: &str = include_str!("../prompts/task_guidance.txt");
const NO_TASKS_GUIDANCE: &str = include_str!("../prompts/no_tasks.txt");
const COMMUNICATION_LEAD: &str = include_str!("../prompts/communication.txt");
const HUMAN_GUIDANCE: &str = include_str!("../prompts/human_guidance.txt");

const SYSTEM_ACCESS_OPEN: &str = "The software that created you is itself an AI capable of \
     processing natural language, so you can freely respond by posting messages to the thread.";

const SYSTEM_ACCESS_CLOSED: &str = "The software that created you is a program that can only \
     process structured responses produced by your tools. DO NOT POST ANY MESSAGES OR RESPONSES \
     TO THE THREAD. They will be ignored and only waste time. ONLY USE TOOLS TO RESPOND.";

const NO_HUMAN_ACCESS: &str = "You can not communicate with a human user at this time.";

/// Everything instruction rendering depends on, gathered by the agent.
#[derive(Debug)]
pub struct InstructionConfig<'a> {
    pub assistant_instructions: Option<&'a str>,
    pub flow_instructions: Option<&'a str>,
    pub agent_instructions: Option<&'a str>,
    pub extra_instructions: &'a [String],
    pub tasks: &'a [TaskHandle],
    pub system_access: bool,
    pub user_access: bool,
    pub context: &'a BTreeMap<String, Value>,
}

/// Renders the full instruction text for one turn.
///
/// Identical configuration state renders byte-identical text; context keys
/// come from a sorted map, so ordering never drifts between calls.
pub fn build_instructions(config: &InstructionConfig<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    // 1. Fixed intro
    sections.push(INTRO.trim_end().to_string());

    // 2. Standing instructions, assistant first, then flow, agent, ad hoc
    let mut bullets: Vec<String> = Vec::new();
    for text in [
        config.assistant_instructions,
        config.flow_instructions,
        config.agent_instructions,
    ]
    .into_iter()
    .flatten()
    {
        bullets.push(format!("- {text}"));
    }
    for text in config.extra_instructions {
        bullets.push(format!("- {text}"));
    }
    let mut section = String::from("## Instructions\n\nFollow these instructions at all times:");
    if !bullets.is_empty() {
        section.push_str("\n\n");
        section.push_str(&bullets.join("\n"));
    }
    sections.push(section);

    // 3. Numbered task list, or end_run guidance when none are assigned
    if config.tasks.is_empty() {
        sections.push(format!("## Tasks\n\n{}", NO_TASKS_GUIDANCE.trim_end()));
    } else {
        let mut section = format!("## Tasks\n\n{}", TASK_GUIDANCE.trim_end());
        for (index, task) in config.tasks.iter().enumerate() {
            section.push_str("\n\n");
            section.push_str(&render_task(index + 1, task));
        }
        sections.push(section);
    }

    // 4. Communication rules follow the access flags
    let mut section = format!("## Communication\n\n{}", COMMUNICATION_LEAD.trim_end());
    section.push_str("\n\n");
    section.push_str(if config.system_access {
        SYSTEM_ACCESS_OPEN
    } else {
        SYSTEM_ACCESS_CLOSED
    });
    section.push_str("\n\n");
    section.push_str(if config.user_access {
        HUMAN_GUIDANCE.trim_end()
    } else {
        NO_HUMAN_ACCESS
    });
    sections.push(section);

    // 5. Caller-supplied context
    if !config.context.is_empty() {
        let mut section =
            String::from("## Additional context\n\nThe following context was provided:");
        for (key, value) in config.context {
            section.push_str(&format!("\n- {key}: {value}"));
        }
        sections.push(section);
    }

    sections.join("\n\n")
}

fn render_task(number: usize, task: &TaskHandle) -> String {
    let status = task.status();
    let mut lines = vec![
        format!("### Task {number}"),
        format!("- Status: {status}"),
        format!("- Objective: {}", task.objective()),
    ];
    if let Some(extra) = task.instructions() {
        lines.push(format!("- Additional instructions: {extra}"));
    }
    match status {
        TaskStatus::Completed => {
            if let Some(result) = task.result_value() {
                lines.push(format!("- Result: {result}"));
            }
        }
        TaskStatus::Failed => {
            if let Some(error) = task.error() {
                lines.push(format!("- Error: {error}"));
            }
        }
        TaskStatus::Pending => {}
    }
    if !task.context().is_empty() {
        let rendered =
            serde_json::to_string(task.context()).unwrap_or_else(|_| String::from("{}"));
        lines.push(format!("- Context: {rendered}"));
    }
    lines.join("\n")
}
