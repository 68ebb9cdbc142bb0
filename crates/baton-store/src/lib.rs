pub mod artifacts;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;

pub use artifacts::{ArtifactRepo, ArtifactRow, SqliteArtifactSink};
pub use database::Database;
pub use error::StoreError;
