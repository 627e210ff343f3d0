//! Database layer for the federation connector.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The download cursor, the upload checkpoint,
//! the last upload response and the event log all live in tables created by
//! the migrations in this crate.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
