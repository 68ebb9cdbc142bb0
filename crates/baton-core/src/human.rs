use std::collections::VecDeque;
use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::tools::ToolError;

/// Channel to a human operator, used by agents granted user access.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Deliver `message`. When `wait_for_reply`, block until the human
    /// answers and return the reply text; otherwise the return value is
    /// unspecified and callers ignore it.
    async fn prompt(&self, message: &str, wait_for_reply: bool) -> Result<String, ToolError>;
}

/// Terminal-backed channel: prints the message and reads a reply line from
/// stdin.
pub struct ConsoleHuman;

#[async_trait]
impl HumanChannel for ConsoleHuman {
    async fn prompt(&self, message: &str, wait_for_reply: bool) -> Result<String, ToolError> {
        let message = message.to_owned();
        let reply = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stdout = std::io::stdout();
            writeln!(stdout, "{message}")?;
            if !wait_for_reply {
                return Ok(String::new());
            }
            write!(stdout, "> ")?;
            stdout.flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_owned())
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("stdin task failed: {e}")))?
        .map_err(|e| ToolError::ExecutionFailed(format!("console io failed: {e}")))?;
        Ok(reply)
    }
}

/// Queued-reply channel for tests: records every prompt and hands out
/// scripted replies in order.
#[derive(Default)]
pub struct ScriptedHuman {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<(String, bool)>>,
}

impl ScriptedHuman {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt delivered so far, with its wait flag.
    pub fn prompts(&self) -> Vec<(String, bool)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl HumanChannel for ScriptedHuman {
    async fn prompt(&self, message: &str, wait_for_reply: bool) -> Result<String, ToolError> {
        self.prompts.lock().push((message.to_owned(), wait_for_reply));
        if !wait_for_reply {
            return Ok(String::new());
        }
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| ToolError::ExecutionFailed("no scripted reply left".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_in_order() {
        let human = ScriptedHuman::with_replies(vec!["yes", "no"]);
        assert_eq!(human.prompt("continue?", true).await.unwrap(), "yes");
        assert_eq!(human.prompt("stop?", true).await.unwrap(), "no");
        assert_eq!(
            human.prompts(),
            vec![("continue?".to_string(), true), ("stop?".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn no_wait_does_not_consume_replies() {
        let human = ScriptedHuman::with_replies(vec!["only one"]);
        human.prompt("fyi", false).await.unwrap();
        assert_eq!(human.prompt("now answer", true).await.unwrap(), "only one");
    }

    #[tokio::test]
    async fn exhausted_replies_error() {
        let human = ScriptedHuman::new();
        let err = human.prompt("anyone there?", true).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
