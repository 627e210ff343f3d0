//! Error types for the event log.

#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    #[error("event log database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("event log pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("event payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
