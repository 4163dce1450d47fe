//! DDL translator
//!
//! Parses a schema-change envelope and emits the equivalent destination
//! DDL. Only the first entry of `payload.tableChanges` is consumed; an
//! empty array means the event carried no table change and translates to
//! nothing.

use serde_json::Value;
use tracing::{debug, warn};

use crate::common::{EngineError, Result};
use crate::destination::{TupleDescriptor, MAX_ATTRIBUTE_LEN};
use crate::event::pluck;
use crate::rules::RuleStore;
use crate::typemap::TypeRegistry;

/// Kind of schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlKind {
    Create,
    Drop,
    Alter,
}

/// One column descriptor from the event.
#[derive(Debug, Clone, Default)]
pub struct DdlColumn {
    pub name: String,
    pub type_name: String,
    pub length: i32,
    pub scale: Option<i32>,
    pub optional: bool,
    pub position: i32,
    pub auto_incremented: bool,
    pub default_expression: Option<String>,
    pub charset: Option<String>,
}

/// A parsed schema-change event.
#[derive(Debug, Clone)]
pub struct DdlRecord {
    /// Fully qualified source id, 1 to 3 dot-separated parts
    pub fqid: String,
    pub kind: DdlKind,
    pub pk_columns: Vec<String>,
    pub columns: Vec<DdlColumn>,
}

/// Destination statements for one schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedDdl {
    pub statements: Vec<String>,
    pub dest_schema: Option<String>,
    pub dest_table: String,
}

impl TranslatedDdl {
    /// Cache key of the affected table; unqualified ids land in `public`.
    pub fn cache_key(&self) -> (String, String) {
        (
            self.dest_schema
                .clone()
                .unwrap_or_else(|| "public".to_string()),
            self.dest_table.clone(),
        )
    }
}

/// Parse the schema-change payload. `Ok(None)` when `tableChanges` is empty.
pub fn parse_ddl(envelope: &Value) -> Result<Option<DdlRecord>> {
    let changes = match pluck(envelope, &["payload", "tableChanges"]) {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Ok(None),
    };
    if changes.len() > 1 {
        debug!(
            dropped = changes.len() - 1,
            "multi-statement schema event; only the first entry is applied"
        );
    }
    let change = &changes[0];

    let fqid = pluck(change, &["id"])
        .and_then(Value::as_str)
        .map(|s| s.trim_matches('"').to_string())
        .ok_or_else(|| EngineError::parse("table change has no id"))?;
    let kind = match pluck(change, &["type"]).and_then(Value::as_str) {
        Some(t) if t.eq_ignore_ascii_case("CREATE") => DdlKind::Create,
        Some(t) if t.eq_ignore_ascii_case("DROP") => DdlKind::Drop,
        Some(t) if t.eq_ignore_ascii_case("ALTER") => DdlKind::Alter,
        Some(other) => {
            return Err(EngineError::parse(format!(
                "unknown table change type '{other}'"
            )))
        }
        None => return Err(EngineError::parse("table change has no type")),
    };

    let pk_columns = match pluck(change, &["table", "primaryKeyColumnNames"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut columns = Vec::new();
    if let Some(Value::Array(items)) = pluck(change, &["table", "columns"]) {
        for item in items {
            columns.push(parse_column(item)?);
        }
    }
    columns.sort_by_key(|c| c.position);

    Ok(Some(DdlRecord {
        fqid,
        kind,
        pk_columns,
        columns,
    }))
}

/// Collect the scalar keys of one column descriptor; nested arrays
/// (`enumValues` and friends) are skipped.
fn parse_column(item: &Value) -> Result<DdlColumn> {
    let obj = item
        .as_object()
        .ok_or_else(|| EngineError::parse("column descriptor is not an object"))?;

    let mut col = DdlColumn {
        optional: true,
        ..DdlColumn::default()
    };
    for (key, value) in obj {
        match (key.as_str(), value) {
            ("name", Value::String(s)) => col.name = s.clone(),
            ("typeName", Value::String(s)) => col.type_name = s.clone(),
            ("length", v) => col.length = v.as_i64().unwrap_or(0) as i32,
            ("scale", v) => col.scale = v.as_i64().map(|s| s as i32),
            ("optional", v) => col.optional = v.as_bool().unwrap_or(true),
            ("position", v) => col.position = v.as_i64().unwrap_or(0) as i32,
            ("autoIncremented", v) => col.auto_incremented = v.as_bool().unwrap_or(false),
            ("defaultValueExpression", Value::String(s)) => {
                col.default_expression = Some(s.clone())
            }
            ("charsetName", Value::String(s)) => col.charset = Some(s.clone()),
            _ => {}
        }
    }
    if col.name.is_empty() || col.type_name.is_empty() {
        return Err(EngineError::parse("column descriptor missing name or type"));
    }
    Ok(col)
}

/// Split a (possibly remapped) table id into destination schema and table.
///
/// One part is a bare table, two parts are `schema.table` (a source using
/// its database as the schema lands here too), three parts are
/// `db.schema.table` and the db is dropped.
fn split_mapped_id(mapped: &str) -> Result<(Option<String>, String)> {
    let parts: Vec<&str> = mapped.split('.').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [table] => Ok((None, (*table).to_string())),
        [schema, table] => Ok((Some((*schema).to_string()), (*table).to_string())),
        [_, schema, table] => Ok((Some((*schema).to_string()), (*table).to_string())),
        _ => Err(EngineError::parse(format!(
            "table id '{mapped}' does not name a table"
        ))),
    }
}

/// Translate a parsed schema change into destination statements.
///
/// ALTER translation compares the source column set against `existing`, the
/// destination's current layout; the caller supplies it for ALTER events
/// and may pass `None` otherwise.
pub fn translate_ddl(
    rec: &DdlRecord,
    rules: &RuleStore,
    types: &TypeRegistry,
    existing: Option<&TupleDescriptor>,
) -> Result<TranslatedDdl> {
    let mapped = rules.table_name(&rec.fqid).unwrap_or(&rec.fqid);
    let (dest_schema, dest_table) = split_mapped_id(mapped)?;
    let qualified = match &dest_schema {
        Some(s) => format!("{s}.{dest_table}"),
        None => dest_table.clone(),
    };

    let statements = match rec.kind {
        DdlKind::Create => emit_create(rec, rules, types, &dest_schema, &qualified),
        DdlKind::Drop => vec![format!("DROP TABLE IF EXISTS {qualified};")],
        DdlKind::Alter => {
            let existing = existing.ok_or_else(|| {
                EngineError::catalog(format!(
                    "cannot alter {qualified}: destination layout unavailable"
                ))
            })?;
            emit_alter(rec, rules, types, &qualified, existing)
        }
    };

    Ok(TranslatedDdl {
        statements,
        dest_schema,
        dest_table,
    })
}

fn emit_create(
    rec: &DdlRecord,
    rules: &RuleStore,
    types: &TypeRegistry,
    dest_schema: &Option<String>,
    qualified: &str,
) -> Vec<String> {
    let mut statements = Vec::new();
    if let Some(schema) = dest_schema {
        statements.push(format!("CREATE SCHEMA IF NOT EXISTS {schema};"));
    }

    let mut parts: Vec<String> = rec
        .columns
        .iter()
        .map(|col| column_clause(col, &rec.fqid, rules, types))
        .collect();

    if !rec.pk_columns.is_empty() {
        let pk: Vec<String> = rec
            .pk_columns
            .iter()
            .map(|name| dest_column_name(&rec.fqid, name, rules))
            .collect();
        parts.push(format!("PRIMARY KEY({})", pk.join(", ")));
    }

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {qualified} ( {});",
        parts.join(" , ")
    ));
    statements
}

fn dest_column_name(fqid: &str, name: &str, rules: &RuleStore) -> String {
    rules
        .column_name(&format!("{fqid}.{name}"))
        .unwrap_or(name)
        .to_string()
}

/// Build the `name type[(len[, scale])] [CHECK ...] [NOT NULL] [DEFAULT ...]`
/// clause shared by CREATE and ALTER ADD.
fn column_clause(col: &DdlColumn, fqid: &str, rules: &RuleStore, types: &TypeRegistry) -> String {
    let name = dest_column_name(fqid, &col.name, rules);
    let (dest_type, rendered) = rendered_type(col, fqid, types);

    let mut clause = format!("{name} {dest_type}{rendered}");
    if col.type_name.to_ascii_uppercase().contains("UNSIGNED") {
        clause.push_str(&format!(" CHECK ({name} >= 0)"));
    }
    if !col.optional {
        clause.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default_expression {
        if !default.is_empty() && !col.auto_incremented {
            clause.push_str(&format!(" DEFAULT {default}"));
        }
    }
    clause
}

/// Resolve the destination type and its `(len[, scale])` suffix.
fn rendered_type(col: &DdlColumn, fqid: &str, types: &TypeRegistry) -> (String, String) {
    let fq_column = format!("{fqid}.{}", col.name);
    let mapping = types.resolve(
        Some(&fq_column),
        &col.type_name,
        col.length,
        col.auto_incremented,
    );
    let len = if mapping.fixed_length >= 0 {
        mapping.fixed_length
    } else {
        col.length
    }
    .min(MAX_ATTRIBUTE_LEN);

    let suffix = if len > 0 {
        match col.scale {
            Some(scale) if scale > 0 => format!("({len}, {scale})"),
            _ => format!("({len})"),
        }
    } else {
        String::new()
    };
    (mapping.dest_type, suffix)
}

fn emit_alter(
    rec: &DdlRecord,
    rules: &RuleStore,
    types: &TypeRegistry,
    qualified: &str,
    existing: &TupleDescriptor,
) -> Vec<String> {
    let dest_names: Vec<String> = rec
        .columns
        .iter()
        .map(|c| dest_column_name(&rec.fqid, &c.name, rules))
        .collect();

    let mut actions: Vec<String> = Vec::new();
    let src_count = rec.columns.len();
    let dst_count = existing.active_len();

    if src_count > dst_count {
        // source grew: add every source column the destination lacks
        for (col, name) in rec.columns.iter().zip(&dest_names) {
            if existing.column(name).is_none() {
                actions.push(format!(
                    "ADD COLUMN {}",
                    column_clause(col, &rec.fqid, rules, types)
                ));
            }
        }
    } else if src_count < dst_count {
        // source shrank: drop destination columns no longer present
        for dest_col in existing.active() {
            let still_present = dest_names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&dest_col.name));
            if !still_present {
                actions.push(format!("DROP COLUMN {}", dest_col.name));
            }
        }
    } else {
        // same arity: modify matched columns in place
        for (col, name) in rec.columns.iter().zip(&dest_names) {
            if existing.column(name).is_none() {
                // renames carry no old name in the event, so they cannot be
                // translated; skip and leave the destination column alone
                warn!(column = %name, table = %qualified, "unmatched column in ALTER; treating as unsupported rename");
                continue;
            }
            let (dest_type, rendered) = rendered_type(col, &rec.fqid, types);
            actions.push(format!(
                "ALTER COLUMN {name} SET DATA TYPE {dest_type}{rendered}"
            ));
            match &col.default_expression {
                Some(default) if !default.is_empty() && !col.auto_incremented => {
                    actions.push(format!("ALTER COLUMN {name} SET DEFAULT {default}"));
                }
                _ => actions.push(format!("ALTER COLUMN {name} DROP DEFAULT")),
            }
            if col.optional {
                actions.push(format!("ALTER COLUMN {name} DROP NOT NULL"));
            } else {
                actions.push(format!("ALTER COLUMN {name} SET NOT NULL"));
            }
        }
    }

    if actions.is_empty() {
        return Vec::new();
    }
    vec![format!("ALTER TABLE {qualified} {};", actions.join(", "))]
}
