//! Scheduled connector binding the federation engine to local resources.
//!
//! One invocation opens the state database, builds the gateway client, the
//! signer and the directory-backed stores from [`config::Config`], then runs
//! the download pipeline followed by the upload pipeline.

pub mod budget;
pub mod config;
pub mod storage;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use keyfed_db::{create_pool, run_migrations, DbRuntimeSettings, MigrationError, PoolError};
use keyfed_federation::{
    Clock, DownloadError, DownloadIngestionPipeline, DownloadSettings, HttpInteropClient,
    InteropError, JwsSigner, KeyValidator, PemFileKeyProvider, SqliteStateStore, SystemClock,
    UploadError, UploadPublishingPipeline, UploadSettings,
};
use keyfed_observe::SqliteEvents;

use crate::budget::DeadlineBudget;
use crate::config::Config;
use crate::storage::{FilesystemBlobStore, FilesystemSubmissionSource};

/// Which pipelines an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Download,
    Upload,
    All,
}

impl Mode {
    fn downloads(self) -> bool {
        matches!(self, Mode::Download | Mode::All)
    }

    fn uploads(self) -> bool {
        matches!(self, Mode::Upload | Mode::All)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode: {0} (expected download, upload or all)")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "download" => Ok(Mode::Download),
            "upload" => Ok(Mode::Upload),
            "all" => Ok(Mode::All),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationSummary {
    pub downloaded_batches: usize,
    pub uploaded_exposures: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to get database connection: {0}")]
    Connection(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to build gateway client: {0}")]
    Client(#[from] InteropError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Runs the pipelines selected by `mode` and the config's enabled flags.
///
/// Both pipelines share one execution budget started before any setup. When
/// the upload will run, the download stops early enough to leave it the
/// configured minimum. The upload pipeline still runs when the download
/// pipeline fails; the first failure is returned once both have finished.
///
/// # Errors
///
/// Returns `ConnectorError` if the database or gateway client cannot be set
/// up, or if either pipeline fails.
pub fn run_invocation(config: &Config, mode: Mode) -> Result<InvocationSummary, ConnectorError> {
    let budget = DeadlineBudget::starting_now(Duration::from_secs(
        config.upload.execution_budget_secs,
    ));

    let pool = create_pool(
        &config.database.path,
        DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )?;
    {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let client = Arc::new(HttpInteropClient::new(
        &config.interop.base_url,
        &config.interop.auth_token,
        Duration::from_secs(config.interop.request_timeout_secs),
    )?);
    let state = Arc::new(SqliteStateStore::new(pool.clone()));
    let events = Arc::new(SqliteEvents::new(pool));
    let clock = Arc::new(SystemClock);

    let mut summary = InvocationSummary::default();
    let mut first_error: Option<ConnectorError> = None;

    if mode.downloads() && config.download.enabled {
        let pipeline = DownloadIngestionPipeline::new(
            client.clone(),
            state.clone(),
            Arc::new(FilesystemBlobStore::new(&config.storage.blob_root)),
            clock.clone(),
            events.clone(),
            KeyValidator::with_valid_origins(config.download.valid_origins.clone()),
            DownloadSettings {
                key_prefix: config.download.key_prefix.clone(),
                initial_history_days: u64::from(config.download.initial_history_days),
                max_batch_count: config.download.max_batch_count,
                risk_level_default: config.download.risk_level_default,
            },
        );
        let download_budget = if mode.uploads() && config.upload.enabled {
            budget.reserving(Duration::from_millis(config.upload.min_remaining_time_ms))
        } else {
            budget
        };
        match pipeline.run(clock.now().date_naive(), &download_budget) {
            Ok(batches) => summary.downloaded_batches = batches,
            Err(e) => {
                tracing::error!(error = %e, "download pipeline failed");
                first_error = Some(e.into());
            }
        }
    } else {
        tracing::debug!("download pipeline skipped");
    }

    if mode.uploads() && config.upload.enabled {
        let signer = Arc::new(JwsSigner::new(Arc::new(PemFileKeyProvider::new(
            &config.signing.private_key_path,
        ))));
        let pipeline = UploadPublishingPipeline::new(
            client,
            state,
            Arc::new(FilesystemSubmissionSource::new(
                &config.storage.submission_root,
            )),
            signer,
            clock,
            events,
            UploadSettings {
                region: config.upload.region.clone(),
                batch_size: config.upload.batch_size,
                initial_history_days: i64::from(config.upload.initial_history_days),
                federated_key_prefixes: config.upload.federated_key_prefixes.clone(),
                risk_level_default: config.upload.risk_level_default,
                min_remaining_time: Duration::from_millis(config.upload.min_remaining_time_ms),
            },
        );
        match pipeline.run(&budget) {
            Ok(exposures) => summary.uploaded_exposures = exposures,
            Err(e) => {
                tracing::error!(error = %e, "upload pipeline failed");
                first_error.get_or_insert(e.into());
            }
        }
    } else {
        tracing::debug!("upload pipeline skipped");
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
