//! DML translator
//!
//! Parses a row-change envelope, resolves the destination table through the
//! catalog cache, decodes every value, and emits either a SQL statement or
//! positional tuple fields depending on the connector's emission mode.

use serde_json::Value;
use tracing::debug;

use crate::common::{EngineError, Result};
use crate::config::EmitMode;
use crate::decode::{decode_value, TimeRep};
use crate::destination::{DataCache, Destination, Oid};
use crate::event::{parse_source, pluck, scalar_text};
use crate::rules::{render_expression, render_geometry_expression, RuleStore};

/// Row operation, from `payload.op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    /// Snapshot read (`r`)
    Read,
    /// Insert (`c`)
    Insert,
    /// Update (`u`)
    Update,
    /// Delete (`d`)
    Delete,
}

impl RowOp {
    pub fn from_letter(letter: &str) -> Result<Self> {
        match letter {
            "r" => Ok(RowOp::Read),
            "c" => Ok(RowOp::Insert),
            "u" => Ok(RowOp::Update),
            "d" => Ok(RowOp::Delete),
            other => Err(EngineError::parse(format!("unknown row op '{other}'"))),
        }
    }

    /// Stats letter; reads and inserts both land rows but count apart.
    pub fn letter(&self) -> char {
        match self {
            RowOp::Read => 'r',
            RowOp::Insert => 'c',
            RowOp::Update => 'u',
            RowOp::Delete => 'd',
        }
    }
}

/// One resolved column value.
#[derive(Debug, Clone)]
pub struct DmlColumn {
    pub remote_name: String,
    /// Destination column name after any remap
    pub name: String,
    pub dest_oid: Oid,
    /// 0-based slot among the destination's active attributes
    pub slot: usize,
    pub typemod: i32,
    pub scale: Option<i32>,
    pub time_rep: TimeRep,
    /// Raw value text; sub-objects arrive as compact JSON
    pub raw: String,
}

/// One field of a positional tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleField {
    Null,
    /// Decoded literal, ready for the destination's input routines
    Text(String),
    /// Transform expression the destination must evaluate first
    Expression(String),
}

/// Tuple-mode output: positional fields aligned with the destination layout.
#[derive(Debug, Clone)]
pub struct TupleOp {
    pub table_oid: Oid,
    pub before: Option<Vec<TupleField>>,
    pub after: Option<Vec<TupleField>>,
}

/// Translator output.
#[derive(Debug, Clone)]
pub enum DmlPayload {
    Sql(String),
    Tuple(TupleOp),
}

#[derive(Debug, Clone)]
pub struct TranslatedDml {
    pub op: RowOp,
    pub dest_schema: String,
    pub dest_table: String,
    pub payload: DmlPayload,
}

/// Parses and emits row changes for one connector.
pub struct DmlTranslator<'a> {
    rules: &'a RuleStore,
    emit: EmitMode,
}

impl<'a> DmlTranslator<'a> {
    pub fn new(rules: &'a RuleStore, emit: EmitMode) -> Self {
        Self { rules, emit }
    }

    /// Translate one row-change envelope.
    pub async fn translate(
        &self,
        envelope: &Value,
        cache: &mut DataCache,
        dest: &dyn Destination,
    ) -> Result<TranslatedDml> {
        let op = pluck(envelope, &["payload", "op"])
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::parse("row change has no payload.op"))
            .and_then(RowOp::from_letter)?;

        let source = parse_source(envelope)?;
        let table = source
            .table
            .clone()
            .ok_or_else(|| EngineError::parse("row change names no table"))?;
        let fqid = match &source.schema {
            Some(schema) => format!("{}.{}.{}", source.db, schema, table),
            None => format!("{}.{}", source.db, table),
        };

        let mapped = self.rules.table_name(&fqid).unwrap_or(&fqid).to_string();
        let (dest_schema, dest_table) = split_dest_id(&mapped)?;
        let entry = cache.lookup(dest, &dest_schema, &dest_table).await?;

        let before = match op {
            RowOp::Update | RowOp::Delete => Some(self.parse_body(
                envelope, "before", &fqid, &entry,
            )?),
            _ => None,
        };
        let after = match op {
            RowOp::Read | RowOp::Insert | RowOp::Update => {
                Some(self.parse_body(envelope, "after", &fqid, &entry)?)
            }
            _ => None,
        };

        let payload = match self.emit {
            EmitMode::Sql => DmlPayload::Sql(self.emit_sql(
                op,
                &dest_schema,
                &dest_table,
                &entry,
                before.as_deref(),
                after.as_deref(),
                &fqid,
            )?),
            EmitMode::Tuple => DmlPayload::Tuple(TupleOp {
                table_oid: entry.table_oid,
                before: before
                    .as_deref()
                    .map(|cols| self.build_row(cols, entry.descriptor.active_len(), &fqid))
                    .transpose()?,
                after: after
                    .as_deref()
                    .map(|cols| self.build_row(cols, entry.descriptor.active_len(), &fqid))
                    .transpose()?,
            }),
        };

        Ok(TranslatedDml {
            op,
            dest_schema,
            dest_table,
            payload,
        })
    }

    /// Walk one body object into resolved columns, sorted by destination
    /// slot. Sub-objects are captured whole as JSON text.
    fn parse_body(
        &self,
        envelope: &Value,
        which: &str,
        fqid: &str,
        entry: &crate::destination::CacheEntry,
    ) -> Result<Vec<DmlColumn>> {
        let body = pluck(envelope, &["payload", which])
            .and_then(Value::as_object)
            .ok_or_else(|| EngineError::parse(format!("row change has no payload.{which}")))?;

        let mut columns = Vec::with_capacity(body.len());
        for (key, value) in body {
            let fq_column = format!("{fqid}.{key}");
            let name = self
                .rules
                .column_name(&fq_column)
                .unwrap_or(key)
                .to_string();

            let (dest_oid, slot, typemod) = entry
                .by_name
                .get(&name.to_ascii_lowercase())
                .copied()
                .ok_or_else(|| {
                    EngineError::mapping(format!(
                        "column \"{name}\" not found in destination table oid {}",
                        entry.table_oid
                    ))
                })?;

            let (scale, time_rep) = field_metadata(envelope, which, key);

            columns.push(DmlColumn {
                remote_name: key.clone(),
                name,
                dest_oid,
                slot,
                typemod,
                scale,
                time_rep,
                raw: scalar_text(value),
            });
        }
        columns.sort_by_key(|c| c.slot);
        Ok(columns)
    }

    /// Decode one column to a SQL literal or an inline expression.
    fn sql_value(&self, col: &DmlColumn, fqid: &str) -> Result<String> {
        let fq_column = format!("{fqid}.{}", col.remote_name);
        let expr = self.rules.expression_for(&fq_column);

        if let Some((wkb, srid)) = geometry_parts(&col.raw) {
            if let Some(expr) = expr {
                return Ok(render_geometry_expression(expr, &wkb, &srid));
            }
        }

        let literal =
            decode_value(col.dest_oid, col.typemod, col.scale, col.time_rep, &col.raw, true)?
                .unwrap_or_else(|| "NULL".to_string());
        match expr {
            Some(expr) => Ok(render_expression(expr, &literal)),
            None => Ok(literal),
        }
    }

    /// Decode one column to a tuple field.
    fn tuple_value(&self, col: &DmlColumn, fqid: &str) -> Result<TupleField> {
        let fq_column = format!("{fqid}.{}", col.remote_name);
        let expr = self.rules.expression_for(&fq_column);

        if let Some((wkb, srid)) = geometry_parts(&col.raw) {
            if let Some(expr) = expr {
                return Ok(TupleField::Expression(render_geometry_expression(
                    expr, &wkb, &srid,
                )));
            }
        }

        let decoded =
            decode_value(col.dest_oid, col.typemod, col.scale, col.time_rep, &col.raw, false)?;
        match (expr, decoded) {
            (Some(expr), Some(text)) => Ok(TupleField::Expression(render_expression(expr, &text))),
            (_, None) => Ok(TupleField::Null),
            (None, Some(text)) => Ok(TupleField::Text(text)),
        }
    }

    fn build_row(
        &self,
        columns: &[DmlColumn],
        active_len: usize,
        fqid: &str,
    ) -> Result<Vec<TupleField>> {
        let mut row = vec![TupleField::Null; active_len];
        for col in columns {
            if col.slot < active_len {
                row[col.slot] = self.tuple_value(col, fqid)?;
            }
        }
        Ok(row)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_sql(
        &self,
        op: RowOp,
        dest_schema: &str,
        dest_table: &str,
        entry: &crate::destination::CacheEntry,
        before: Option<&[DmlColumn]>,
        after: Option<&[DmlColumn]>,
        fqid: &str,
    ) -> Result<String> {
        let qualified = format!("{dest_schema}.{dest_table}");
        match op {
            RowOp::Read | RowOp::Insert => {
                let after = after.ok_or_else(|| EngineError::parse("insert without after image"))?;
                let names: Vec<&str> = after.iter().map(|c| c.name.as_str()).collect();
                let values = after
                    .iter()
                    .map(|c| self.sql_value(c, fqid))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!(
                    "INSERT INTO {qualified}({}) VALUES ({});",
                    names.join(","),
                    values.join(",")
                ))
            }
            RowOp::Update => {
                let before =
                    before.ok_or_else(|| EngineError::parse("update without before image"))?;
                let after = after.ok_or_else(|| EngineError::parse("update without after image"))?;
                let sets = after
                    .iter()
                    .map(|c| Ok(format!("{} = {}", c.name, self.sql_value(c, fqid)?)))
                    .collect::<Result<Vec<_>>>()?;
                let clause = self.where_clause(entry, before, fqid)?;
                Ok(format!(
                    "UPDATE {qualified} SET {} WHERE {clause};",
                    sets.join(", ")
                ))
            }
            RowOp::Delete => {
                let before =
                    before.ok_or_else(|| EngineError::parse("delete without before image"))?;
                let clause = self.where_clause(entry, before, fqid)?;
                Ok(format!("DELETE FROM {qualified} WHERE {clause};"))
            }
        }
    }

    /// Primary-key predicate when the table declares one; the full before
    /// image otherwise.
    fn where_clause(
        &self,
        entry: &crate::destination::CacheEntry,
        before: &[DmlColumn],
        fqid: &str,
    ) -> Result<String> {
        let key_cols: Vec<&DmlColumn> = if entry.pk_positions.is_empty() {
            before.iter().collect()
        } else {
            let keyed: Vec<&DmlColumn> = before
                .iter()
                .filter(|c| entry.pk_positions.contains(&c.slot))
                .collect();
            if keyed.len() == entry.pk_positions.len() {
                keyed
            } else {
                debug!("incomplete key in before image; matching on the full row");
                before.iter().collect()
            }
        };

        let parts = key_cols
            .iter()
            .map(|c| {
                let value = self.sql_value(c, fqid)?;
                if value == "NULL" {
                    Ok(format!("{} IS NULL", c.name))
                } else {
                    Ok(format!("{} = {value}", c.name))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(" AND "))
    }
}

/// Split a (possibly remapped) DML table id; a bare table defaults to the
/// `public` schema.
fn split_dest_id(mapped: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = mapped.split('.').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [table] => Ok(("public".to_string(), (*table).to_string())),
        [schema, table] => Ok(((*schema).to_string(), (*table).to_string())),
        [_, schema, table] => Ok(((*schema).to_string(), (*table).to_string())),
        _ => Err(EngineError::parse(format!(
            "table id '{mapped}' does not name a table"
        ))),
    }
}

/// Detect a geometry sub-object: JSON with a `wkb` key and optional `srid`.
fn geometry_parts(raw: &str) -> Option<(String, String)> {
    if !raw.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(raw).ok()?;
    let wkb = value.get("wkb")?.as_str()?.to_string();
    let srid = match value.get("srid") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => "0".to_string(),
    };
    Some((wkb, srid))
}

/// Scale and time representation from the field schema block.
///
/// The envelope's `schema.fields` array carries one entry per body
/// (`before`, `after`); each holds per-column descriptors with an optional
/// semantic type name and a `scale` parameter.
fn field_metadata(envelope: &Value, which: &str, column: &str) -> (Option<i32>, TimeRep) {
    let Some(Value::Array(bodies)) = pluck(envelope, &["schema", "fields"]) else {
        return (None, TimeRep::Undef);
    };
    let body_schema = bodies
        .iter()
        .find(|b| pluck(b, &["field"]).and_then(Value::as_str) == Some(which));
    let Some(Value::Array(fields)) = body_schema.and_then(|b| pluck(b, &["fields"])) else {
        return (None, TimeRep::Undef);
    };
    let Some(field) = fields
        .iter()
        .find(|f| pluck(f, &["field"]).and_then(Value::as_str) == Some(column))
    else {
        return (None, TimeRep::Undef);
    };

    let scale = match pluck(field, &["parameters", "scale"]) {
        Some(Value::String(s)) => s.parse::<i32>().ok(),
        Some(Value::Number(n)) => n.as_i64().map(|v| v as i32),
        _ => None,
    };
    let time_rep = pluck(field, &["name"])
        .and_then(Value::as_str)
        .map(TimeRep::from_semantic)
        .unwrap_or_default();
    (scale, time_rep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_op_letters() {
        assert_eq!(RowOp::from_letter("c").unwrap(), RowOp::Insert);
        assert_eq!(RowOp::from_letter("r").unwrap(), RowOp::Read);
        assert_eq!(RowOp::from_letter("u").unwrap(), RowOp::Update);
        assert_eq!(RowOp::from_letter("d").unwrap(), RowOp::Delete);
        assert!(RowOp::from_letter("t").is_err());
    }

    #[test]
    fn test_split_dest_id_defaults_to_public() {
        assert_eq!(
            split_dest_id("orders").unwrap(),
            ("public".to_string(), "orders".to_string())
        );
        assert_eq!(
            split_dest_id("inv.orders").unwrap(),
            ("inv".to_string(), "orders".to_string())
        );
        assert_eq!(
            split_dest_id("db.inv.orders").unwrap(),
            ("inv".to_string(), "orders".to_string())
        );
    }

    #[test]
    fn test_geometry_detection() {
        let (wkb, srid) =
            geometry_parts(r#"{"wkb":"AQEAAAAAAAAAAADwPwAAAAAAAPA/","srid":4326}"#).unwrap();
        assert_eq!(wkb, "AQEAAAAAAAAAAADwPwAAAAAAAPA/");
        assert_eq!(srid, "4326");

        assert!(geometry_parts("plain text").is_none());
        assert!(geometry_parts(r#"{"x":1}"#).is_none());

        let (_, srid) = geometry_parts(r#"{"wkb":"AQ=="}"#).unwrap();
        assert_eq!(srid, "0");
    }

    #[test]
    fn test_field_metadata_lookup() {
        let envelope = serde_json::json!({
            "schema": {"fields": [
                {"field": "before", "fields": []},
                {"field": "after", "fields": [
                    {"field": "price", "name": "org.apache.kafka.connect.data.Decimal",
                     "parameters": {"scale": "2"}},
                    {"field": "created", "name": "io.debezium.time.Timestamp"}
                ]}
            ]},
            "payload": {}
        });
        let (scale, rep) = field_metadata(&envelope, "after", "price");
        assert_eq!(scale, Some(2));
        assert_eq!(rep, TimeRep::Undef);

        let (scale, rep) = field_metadata(&envelope, "after", "created");
        assert_eq!(scale, None);
        assert_eq!(rep, TimeRep::Timestamp);

        let (scale, rep) = field_metadata(&envelope, "before", "price");
        assert_eq!(scale, None);
        assert_eq!(rep, TimeRep::Undef);
    }
}
