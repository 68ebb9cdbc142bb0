use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle. Advances PENDING -> COMPLETED or PENDING -> FAILED and
/// never moves again once terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("result validation failed: {detail}")]
    Validation { detail: String },
    #[error("task is already {status}")]
    AlreadyResolved { status: TaskStatus },
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
}

type Coercer = Box<dyn Fn(Value) -> Result<Value, TaskError> + Send + Sync>;

struct TaskInner {
    objective: String,
    instructions: Option<String>,
    context: BTreeMap<String, Value>,
    coerce: Coercer,
    state: Mutex<TaskState>,
}

impl TaskInner {
    fn complete(&self, value: Value) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return Err(TaskError::AlreadyResolved { status: state.status });
        }
        let coerced = (self.coerce)(value)?;
        state.status = TaskStatus::Completed;
        state.result = Some(coerced);
        Ok(())
    }

    fn fail(&self, message: String) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return Err(TaskError::AlreadyResolved { status: state.status });
        }
        state.status = TaskStatus::Failed;
        state.error = Some(message);
        Ok(())
    }
}

/// A declared unit of work with a typed result. The result type is fixed
/// here, at creation; every completion value must coerce to it.
pub struct Task<T> {
    inner: Arc<TaskInner>,
    _result: PhantomData<fn() -> T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _result: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("objective", &self.inner.objective)
            .field("status", &self.status())
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned + 'static> Task<T> {
    pub fn new(objective: impl Into<String>) -> Self {
        Self::with_details(objective, None, BTreeMap::new())
    }

    pub fn with_details(
        objective: impl Into<String>,
        instructions: Option<String>,
        context: BTreeMap<String, Value>,
    ) -> Self {
        let coerce: Coercer = Box::new(|value: Value| {
            let typed: T = serde_json::from_value(value)
                .map_err(|e| TaskError::Validation { detail: e.to_string() })?;
            serde_json::to_value(typed).map_err(|e| TaskError::Validation { detail: e.to_string() })
        });
        Self {
            inner: Arc::new(TaskInner {
                objective: objective.into(),
                instructions,
                context,
                coerce,
                state: Mutex::new(TaskState {
                    status: TaskStatus::Pending,
                    result: None,
                    error: None,
                }),
            }),
            _result: PhantomData,
        }
    }

    /// Typed view of the stored result. Present only once COMPLETED.
    pub fn result(&self) -> Option<T> {
        let state = self.inner.state.lock();
        state
            .result
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl<T> Task<T> {
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn objective(&self) -> &str {
        &self.inner.objective
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }
}

/// Type-erased view of a task, used where tasks of different result types
/// sit in one list. Validation still runs against the originating type.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    pub fn objective(&self) -> &str {
        &self.inner.objective
    }

    pub fn instructions(&self) -> Option<&str> {
        self.inner.instructions.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.inner.context
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state.lock().status
    }

    pub fn result_value(&self) -> Option<Value> {
        self.inner.state.lock().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub fn complete(&self, value: Value) -> Result<(), TaskError> {
        self.inner.complete(value)
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<(), TaskError> {
        self.inner.fail(message.into())
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("objective", &self.inner.objective)
            .field("status", &self.status())
            .finish()
    }
}
