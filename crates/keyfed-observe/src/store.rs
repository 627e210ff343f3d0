//! Persistence operations for the event log.
//!
//! Writes go through [`emit_event`], which assigns the next sequence number
//! and inserts the serialised payload in one statement. Reads go through
//! [`query_events`].

use rusqlite::{params, Connection};

use crate::error::ObserveError;
use crate::event::{EventDomain, EventPayload, LoggedEvent};

/// Appends one event to the log.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_event(conn: &Connection, payload: &EventPayload) -> Result<LoggedEvent, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let domain = payload.domain();
    let event_type = payload.event_type();
    let entity_type = payload.entity_type();
    let entity_id = payload.entity_id();

    // Sequence assignment and insert share one statement so concurrent
    // writers cannot observe the same MAX(seq).
    let (id, seq, occurred_at) = conn.query_row(
        "INSERT INTO event_log
            (seq, domain, event_type, entity_type, entity_id, payload_json)
         VALUES (
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM event_log),
            ?1, ?2, ?3, ?4, ?5
         )
         RETURNING id, seq, occurred_at",
        params![domain.as_str(), event_type, entity_type, entity_id, payload_json],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;

    Ok(LoggedEvent {
        id,
        seq,
        domain: domain.as_str().to_string(),
        event_type: event_type.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        payload_json,
        occurred_at,
    })
}

/// Filter criteria for [`query_events`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub domain: Option<EventDomain>,
    pub event_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Only events at or after this ISO 8601 timestamp.
    pub since: Option<String>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<i64>,
}

/// Queries the event log, oldest first.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn query_events(
    conn: &Connection,
    filter: &EventFilter,
) -> Result<Vec<LoggedEvent>, ObserveError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    let string_filters = [
        ("domain", filter.domain.map(|d| d.as_str().to_string())),
        ("event_type", filter.event_type.clone()),
        ("entity_type", filter.entity_type.clone()),
        ("entity_id", filter.entity_id.clone()),
    ];
    for (column, value) in string_filters {
        if let Some(value) = value {
            param_values.push(Box::new(value));
            clauses.push(format!("{column} = ?{}", param_values.len()));
        }
    }

    if let Some(ref since) = filter.since {
        param_values.push(Box::new(since.clone()));
        clauses.push(format!("occurred_at >= ?{}", param_values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    param_values.push(Box::new(filter.limit.unwrap_or(100)));
    let sql = format!(
        "SELECT id, seq, domain, event_type, entity_type, entity_id, payload_json, occurred_at
         FROM event_log
         {where_clause}
         ORDER BY seq ASC
         LIMIT ?{}",
        param_values.len()
    );

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(LoggedEvent {
            id: row.get(0)?,
            seq: row.get(1)?,
            domain: row.get(2)?,
            event_type: row.get(3)?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            payload_json: row.get(6)?,
            occurred_at: row.get(7)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}
