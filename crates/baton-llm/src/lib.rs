pub mod exclusive;
pub mod openai;
pub mod reliable;
pub mod scripted;

pub use exclusive::ExclusiveProvider;
pub use openai::OpenAiProvider;
pub use reliable::{ReliableConfig, ReliableProvider};
pub use scripted::{ScriptedProvider, ScriptedReply};
