//! SQLite-backed [`FederationStateStore`].

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use keyfed_db::DbPool;
use keyfed_types::{BatchTag, CandidatePosition, Cursor, UploadState};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::error::StoreError;
use crate::store::FederationStateStore;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// State store over the tables created by `keyfed-db` migrations.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: DbPool,
}

impl SqliteStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| StoreError::Serialization(format!("batch_date {value:?}: {e}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("submitted_at {value:?}: {e}")))
}

impl FederationStateStore for SqliteStateStore {
    fn cursor(&self) -> Result<Option<Cursor>, StoreError> {
        let conn = self.pool.get()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT batch_tag, batch_date FROM download_cursor WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(tag, date)| {
            Ok(Cursor {
                batch_tag: BatchTag::new(tag),
                batch_date: parse_date(&date)?,
            })
        })
        .transpose()
    }

    fn advance_cursor(&self, expected: Option<&BatchTag>, next: &Cursor) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let found: Option<String> = tx
            .query_row(
                "SELECT batch_tag FROM download_cursor WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let found = found.map(BatchTag::new);
        if found.as_ref() != expected {
            return Err(StoreError::Conflict {
                expected: expected.cloned(),
                found,
            });
        }

        tx.execute(
            "INSERT INTO download_cursor (id, batch_tag, batch_date, updated_at)
             VALUES (1, ?1, ?2, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                batch_tag = excluded.batch_tag,
                batch_date = excluded.batch_date,
                updated_at = excluded.updated_at",
            params![
                next.batch_tag.as_str(),
                next.batch_date.format(DATE_FORMAT).to_string()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn upload_state(&self) -> Result<Option<UploadState>, StoreError> {
        let conn = self.pool.get()?;
        let state = conn
            .query_row(
                "SELECT batch_tag, inserted_exposures FROM upload_state WHERE id = 1",
                [],
                |row| {
                    Ok(UploadState {
                        batch_tag: BatchTag::new(row.get::<_, String>(0)?),
                        inserted_exposures: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn record_upload_state(&self, state: &UploadState) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO upload_state (id, batch_tag, inserted_exposures, updated_at)
             VALUES (1, ?1, ?2, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                batch_tag = excluded.batch_tag,
                inserted_exposures = excluded.inserted_exposures,
                updated_at = excluded.updated_at",
            params![state.batch_tag.as_str(), state.inserted_exposures],
        )?;
        Ok(())
    }

    fn upload_checkpoint(&self) -> Result<Option<CandidatePosition>, StoreError> {
        let conn = self.pool.get()?;
        let row: Option<(String, String, u32)> = conn
            .query_row(
                "SELECT submitted_at, storage_key, key_index FROM upload_checkpoint WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(submitted_at, storage_key, key_index)| {
            Ok(CandidatePosition {
                submitted_at: parse_timestamp(&submitted_at)?,
                storage_key,
                key_index,
            })
        })
        .transpose()
    }

    fn set_upload_checkpoint(&self, position: &CandidatePosition) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO upload_checkpoint (id, submitted_at, storage_key, key_index, updated_at)
             VALUES (1, ?1, ?2, ?3, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                submitted_at = excluded.submitted_at,
                storage_key = excluded.storage_key,
                key_index = excluded.key_index,
                updated_at = excluded.updated_at",
            params![
                position
                    .submitted_at
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
                position.storage_key,
                position.key_index
            ],
        )?;
        Ok(())
    }
}
