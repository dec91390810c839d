use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Record already exists for key {key}")]
    DuplicateKey { key: String },

    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Database is closed")]
    Closed,

    #[error("Storage error during {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap an sqlx error with the operation it interrupted.
    pub(crate) fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| match source {
            sqlx::Error::PoolClosed => StoreError::Closed,
            source => StoreError::Storage { context, source },
        }
    }
}
