//! Error kinds for the federation engine.
//!
//! Download soft failures are not errors: they surface as
//! [`DownloadOutcome::Empty`](crate::DownloadOutcome::Empty).

use keyfed_types::BatchTag;

/// Failure talking to the federation gateway.
#[derive(Debug, thiserror::Error)]
pub enum InteropError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("failed to decode gateway response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("failed to sign payload: {0}")]
    Signature(String),

    #[error("failed to encode signed payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failure reading or writing the blob store or submission source.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Failure reading or writing the persisted cursor and upload state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("state store pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("state store serialization error: {0}")]
    Serialization(String),

    /// Another writer advanced the cursor since it was read.
    #[error("cursor conflict: expected {expected:?}, found {found:?}")]
    Conflict {
        expected: Option<BatchTag>,
        found: Option<BatchTag>,
    },

    #[error("state store lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("failed to store downloaded keys: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to read or advance cursor: {0}")]
    State(#[from] StoreError),

    #[error("failed to serialize stored keys: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload to gateway failed: {0}")]
    Interop(#[from] InteropError),

    #[error("failed to sign upload batch: {0}")]
    Signing(#[from] SigningError),

    #[error("failed to read submissions: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to read or record upload state: {0}")]
    State(#[from] StoreError),

    #[error("failed to serialize upload batch: {0}")]
    Serialization(#[from] serde_json::Error),
}
