use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Json,
    Markdown,
    Code,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Code => "code",
        }
    }
}

/// A recorded observation: tool arguments, a wrapped tool result, or a
/// turn transcript, linked to its turn by correlation id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub key: String,
    pub payload: Value,
    pub description: String,
    pub correlation_id: String,
}

impl Artifact {
    pub fn new(
        kind: ArtifactKind,
        key: impl Into<String>,
        payload: Value,
        description: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            payload,
            description: description.into(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn json(
        key: impl Into<String>,
        payload: Value,
        description: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self::new(ArtifactKind::Json, key, payload, description, correlation_id)
    }

    pub fn markdown(
        key: impl Into<String>,
        text: impl Into<String>,
        description: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self::new(
            ArtifactKind::Markdown,
            key,
            Value::String(text.into()),
            description,
            correlation_id,
        )
    }
}

/// Observation boundary for artifacts. Fire-and-forget: implementations
/// swallow their own failures; recording never blocks or aborts a run.
pub trait ArtifactSink: Send + Sync {
    fn record(&self, artifact: Artifact);
}

/// Collects artifacts in memory, oldest first.
#[derive(Default)]
pub struct MemoryArtifactSink {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn by_key(&self, key: &str) -> Vec<Artifact> {
        self.artifacts
            .lock()
            .iter()
            .filter(|a| a.key == key)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.artifacts.lock().len()
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn record(&self, artifact: Artifact) {
        self.artifacts.lock().push(artifact);
    }
}

/// Discards everything recorded into it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullArtifactSink;

impl ArtifactSink for NullArtifactSink {
    fn record(&self, _artifact: Artifact) {}
}
