use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use baton_core::artifacts::{Artifact, ArtifactKind, ArtifactSink};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored artifact row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub id: i64,
    pub correlation_id: String,
    pub kind: ArtifactKind,
    pub key: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Append-only store for run artifacts, queryable by turn.
pub struct ArtifactRepo {
    db: Database,
}

impl ArtifactRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one artifact. Rows are immutable once written.
    #[instrument(skip(self, artifact), fields(key = %artifact.key, correlation_id = %artifact.correlation_id))]
    pub fn append(&self, artifact: &Artifact) -> Result<ArtifactRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let payload = serde_json::to_string(&artifact.payload)?;

            conn.execute(
                "INSERT INTO artifacts (correlation_id, kind, key, description, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    artifact.correlation_id,
                    artifact.kind.as_str(),
                    artifact.key,
                    artifact.description,
                    payload,
                    now,
                ],
            )?;

            Ok(ArtifactRow {
                id: conn.last_insert_rowid(),
                correlation_id: artifact.correlation_id.clone(),
                kind: artifact.kind,
                key: artifact.key.clone(),
                description: artifact.description.clone(),
                payload: artifact.payload.clone(),
                created_at: now,
            })
        })
    }

    /// Get a single artifact by row id.
    #[instrument(skip(self), fields(id = id))]
    pub fn get(&self, id: i64) -> Result<ArtifactRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, correlation_id, kind, key, description, payload, created_at
                 FROM artifacts WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_artifact(row),
                None => Err(StoreError::NotFound(format!("artifact {id}"))),
            }
        })
    }

    /// List everything recorded under one correlation id, oldest first.
    #[instrument(skip(self), fields(correlation_id = %correlation_id))]
    pub fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<ArtifactRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, correlation_id, kind, key, description, payload, created_at
                 FROM artifacts WHERE correlation_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([correlation_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_artifact(row)?);
            }
            Ok(results)
        })
    }

    /// List artifacts stored under a key across all turns, oldest first.
    #[instrument(skip(self), fields(key = %key))]
    pub fn list_by_key(&self, key: &str) -> Result<Vec<ArtifactRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, correlation_id, kind, key, description, payload, created_at
                 FROM artifacts WHERE key = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([key])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_artifact(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))?)
        })
    }
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> Result<ArtifactRow, StoreError> {
    let kind_str: String = row_helpers::get(row, 2, "artifacts", "kind")?;
    let payload_str: String = row_helpers::get(row, 5, "artifacts", "payload")?;

    Ok(ArtifactRow {
        id: row_helpers::get(row, 0, "artifacts", "id")?,
        correlation_id: row_helpers::get(row, 1, "artifacts", "correlation_id")?,
        kind: parse_kind(&kind_str)?,
        key: row_helpers::get(row, 3, "artifacts", "key")?,
        description: row_helpers::get(row, 4, "artifacts", "description")?,
        payload: row_helpers::parse_json(&payload_str, "artifacts", "payload")?,
        created_at: row_helpers::get(row, 6, "artifacts", "created_at")?,
    })
}

fn parse_kind(raw: &str) -> Result<ArtifactKind, StoreError> {
    match raw {
        "json" => Ok(ArtifactKind::Json),
        "markdown" => Ok(ArtifactKind::Markdown),
        "code" => Ok(ArtifactKind::Code),
        other => Err(StoreError::CorruptRow {
            table: "artifacts",
            column: "kind",
            detail: format!("unknown kind: {other}"),
        }),
    }
}

/// ArtifactSink backed by SQLite. Failures are logged and swallowed;
/// recording never aborts a run.
pub struct SqliteArtifactSink {
    repo: ArtifactRepo,
}

impl SqliteArtifactSink {
    pub fn new(db: Database) -> Self {
        Self {
            repo: ArtifactRepo::new(db),
        }
    }
}

impl ArtifactSink for SqliteArtifactSink {
    fn record(&self, artifact: Artifact) {
        if let Err(e) = self.repo.append(&artifact) {
            error!(key = %artifact.key, error = %e, "failed to persist artifact");
        }
    }
}
