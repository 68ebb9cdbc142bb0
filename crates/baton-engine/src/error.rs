use baton_core::errors::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The model marked the task failed; carries the recorded error message.
    #[error("task failed: {error}")]
    TaskFailed { error: String },

    #[error("{0}")]
    Internal(String),
}
