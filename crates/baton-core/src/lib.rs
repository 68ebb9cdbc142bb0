pub mod artifacts;
pub mod errors;
pub mod events;
pub mod human;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod task;
pub mod thread;
pub mod tools;

pub use artifacts::{Artifact, ArtifactKind, ArtifactSink};
pub use errors::ProviderError;
pub use events::{EventSink, OrchestrationEvent};
pub use messages::Message;
pub use provider::{InvokeRequest, ModelProvider, ModelReply};
pub use task::{Task, TaskError, TaskHandle, TaskStatus};
pub use thread::Thread;
pub use tools::{ToolCall, ToolDescriptor, ToolError};
