//! Event side channel for the federation connector.
//!
//! Pipelines report what they did (pages fetched, keys rejected, chunks
//! published, budget stops) as typed [`EventPayload`]s handed to an
//! [`Events`] sink. Emitting is infallible for the caller: a sink that cannot
//! persist an event logs the failure and moves on, so observability never
//! changes the outcome of a run.
//!
//! # Event domains
//!
//! | Domain | Example events |
//! |--------|---------------|
//! | `DOWNLOAD` | `DOWNLOADED_EXPOSURES`, `INVALID_ORIGIN_KEYS`, `DOWNLOAD_FINISHED` |
//! | `UPLOAD` | `UPLOADED_DIAGNOSIS_KEYS`, `UPLOAD_BUDGET_EXHAUSTED`, `UPLOAD_FINISHED` |
//! | `VALIDATION` | `INVALID_TEMPORARY_EXPOSURE_KEY`, `INVALID_ROLLING_START_NUMBER` |
//!
//! The SQLite sink appends to the `event_log` table created by `keyfed-db`;
//! [`query_events`] reads it back for audits.

mod error;
mod event;
mod sink;
mod store;

pub use error::ObserveError;
pub use event::{EventDomain, EventPayload, LoggedEvent, ParseEventDomainError};
pub use sink::{Events, RecordingEvents, SqliteEvents, TracingEvents};
pub use store::{emit_event, query_events, EventFilter};
