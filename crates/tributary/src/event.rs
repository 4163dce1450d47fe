//! Change event envelopes
//!
//! Every event from the producer is one JSON object. Schema changes carry a
//! `payload.ddl` string plus a `payload.tableChanges` array; row changes
//! carry `payload.op` with `payload.before` / `payload.after` bodies. Both
//! share the `payload.source` block identifying the origin table.

use serde_json::Value;

use crate::common::{EngineError, Result};

/// Coarse event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Schema change: `payload.ddl` is present
    Ddl,
    /// Row change: `payload.op` is present
    Dml,
    /// Heartbeat, transaction marker, or anything else
    Other,
}

/// Snapshot marker from `payload.source.snapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMarker {
    /// Event replays existing rows
    InSnapshot,
    /// Final snapshot event
    Last,
    /// Live streamed change
    #[default]
    Streaming,
}

/// The `payload.source` block common to DDL and DML envelopes.
#[derive(Debug, Clone, Default)]
pub struct SourceBlock {
    pub connector: Option<String>,
    pub db: String,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub snapshot: SnapshotMarker,
    /// Source-side event timestamp, epoch millis
    pub ts_ms: Option<i64>,
}

/// Fetch a nested value by dot-free path segments.
///
/// Returns `None` when any segment is missing or explicitly `null`.
pub fn pluck<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Render a scalar JSON value as the literal text the decoder consumes.
///
/// Strings lose their quotes; numbers and booleans keep their lexeme;
/// objects and arrays are captured whole as compact JSON (this is how
/// geometry and similar composites travel through the pipeline).
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Parse an event string into JSON.
pub fn parse_envelope(raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| EngineError::parse(format!("malformed change event: {e}")))
}

/// Classify an envelope by its payload keys.
pub fn classify(envelope: &Value) -> EventKind {
    if pluck(envelope, &["payload", "ddl"]).is_some()
        || pluck(envelope, &["payload", "tableChanges"]).is_some()
    {
        EventKind::Ddl
    } else if pluck(envelope, &["payload", "op"]).is_some() {
        EventKind::Dml
    } else {
        EventKind::Other
    }
}

/// Parse the shared `payload.source` block.
pub fn parse_source(envelope: &Value) -> Result<SourceBlock> {
    let source = pluck(envelope, &["payload", "source"])
        .ok_or_else(|| EngineError::parse("event has no payload.source block"))?;

    let string_at = |key: &str| {
        pluck(source, &[key])
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let snapshot = match pluck(source, &["snapshot"]) {
        Some(Value::String(s)) if s == "last" => SnapshotMarker::Last,
        Some(Value::String(s)) if s == "true" => SnapshotMarker::InSnapshot,
        Some(Value::Bool(true)) => SnapshotMarker::InSnapshot,
        _ => SnapshotMarker::Streaming,
    };

    Ok(SourceBlock {
        connector: string_at("connector"),
        db: string_at("db").unwrap_or_default(),
        schema: string_at("schema"),
        table: string_at("table"),
        snapshot,
        ts_ms: pluck(source, &["ts_ms"]).and_then(Value::as_i64),
    })
}

/// Envelope-level producer timestamp (`payload.ts_ms`).
pub fn producer_ts_ms(envelope: &Value) -> Option<i64> {
    pluck(envelope, &["payload", "ts_ms"]).and_then(Value::as_i64)
}
