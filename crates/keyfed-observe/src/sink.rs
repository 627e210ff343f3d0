//! Event sinks handed to the pipelines.

use std::sync::Mutex;

use keyfed_db::DbPool;

use crate::event::EventPayload;
use crate::store::emit_event;

/// Destination for domain events.
///
/// Emitting never fails from the caller's point of view. Sinks that can
/// fail log the problem and carry on.
pub trait Events: Send + Sync {
    fn emit(&self, event: EventPayload);
}

/// Writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl Events for TracingEvents {
    fn emit(&self, event: EventPayload) {
        log_event(&event);
    }
}

/// Logs the event and appends it to the SQLite event log.
#[derive(Clone)]
pub struct SqliteEvents {
    pool: DbPool,
}

impl SqliteEvents {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl Events for SqliteEvents {
    fn emit(&self, event: EventPayload) {
        log_event(&event);

        let conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, event_type = event.event_type(), "event log connection unavailable");
                return;
            }
        };
        if let Err(e) = emit_event(&conn, &event) {
            tracing::warn!(error = %e, event_type = event.event_type(), "failed to persist event");
        }
    }
}

/// Keeps events in memory for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<EventPayload>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    pub fn events(&self) -> Vec<EventPayload> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Counts recorded events with the given event type.
    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl Events for RecordingEvents {
    fn emit(&self, event: EventPayload) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

fn log_event(event: &EventPayload) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    if event.is_warning() {
        tracing::warn!(
            domain = %event.domain(),
            event_type = event.event_type(),
            payload = %payload,
            "federation event"
        );
    } else {
        tracing::info!(
            domain = %event.domain(),
            event_type = event.event_type(),
            payload = %payload,
            "federation event"
        );
    }
}
