//! Diagnosis key federation engine.
//!
//! Keeps the local key store in step with the federation gateway:
//!
//! - **Ingestion** ([`DownloadIngestionPipeline`]) follows the gateway's
//!   batch-tag pagination from the persisted [`Cursor`](keyfed_types::Cursor),
//!   validates each page with [`KeyValidator`], writes one object per origin
//!   and advances the cursor only after a page is fully stored.
//! - **Publishing** ([`UploadPublishingPipeline`]) reads locally submitted
//!   keys after the last confirmed checkpoint, drops keys that came from the
//!   gateway, signs each chunk as an ES256 JWS and uploads it while the
//!   execution budget allows.
//!
//! Every external dependency is a trait (`InteropGatewayClient`,
//! `FederationStateStore`, `BlobStore`, `SubmissionSource`, `Clock`,
//! `ExecutionBudget`, `SigningKeyProvider`) with one production
//! implementation and an in-memory counterpart in [`memory`].
//!
//! Runs are synchronous and single-threaded. Network calls block.

pub mod client;
pub mod db;
pub mod download;
pub mod error;
pub mod memory;
pub mod signing;
pub mod store;
pub mod types;
pub mod upload;
pub mod validation;

pub use client::{DownloadOutcome, EmptyReason, HttpInteropClient, InteropGatewayClient, Pages};
pub use db::SqliteStateStore;
pub use download::{DownloadIngestionPipeline, DownloadSettings};
pub use error::{DownloadError, InteropError, SigningError, StorageError, StoreError, UploadError};
pub use signing::{
    verify_compact, JwsSigner, PayloadSigner, PemFileKeyProvider, SigningKeyProvider,
    StaticKeyProvider,
};
pub use store::{
    BlobStore, Clock, ExecutionBudget, FederationStateStore, SubmissionSource, SystemClock,
};
pub use types::{DiagnosisKeysUploadRequest, ExposureUpload};
pub use upload::{UploadPublishingPipeline, UploadSettings};
pub use validation::{check_key_data, KeyRejection, KeyValidator};
