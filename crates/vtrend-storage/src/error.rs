use thiserror::Error;
use vtrend_core::DecodeError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("serializing document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{collection}/{id} not found")]
    NotFound { collection: &'static str, id: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// A single malformed document; scans may log it and move on.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
