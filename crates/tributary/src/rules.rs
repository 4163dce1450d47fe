//! User rule files
//!
//! A rule file is a JSON document with three arrays: data type overrides,
//! object name remaps, and per-column transform expressions. All three are
//! optional; a missing file means "no overrides".
//!
//! ```json
//! {
//!   "transform_datatype_rules": [
//!     {"translate_from": "GEOMETRY", "translate_to": "geometry", "translate_to_size": -1}
//!   ],
//!   "transform_objectname_rules": [
//!     {"object_type": "table", "source_object": "inv.orders", "destination_object": "sales.orders"}
//!   ],
//!   "transform_expression_rules": [
//!     {"transform_from": "inv.orders.note", "transform_expression": "upper(%d)"}
//!   ]
//! }
//! ```
//!
//! Expression placeholders: `%d` is the decoded literal; geometry values
//! substitute `%w` (WKB, base64) and `%s` (SRID) instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::common::{EngineError, ErrorStrategy, Result};

/// One data type override.
///
/// `translate_from` is either a bare source type (`"TINYTEXT"`) or a fully
/// qualified column (`"db.schema.table.col.TINYTEXT"`). A negative
/// `translate_to_size` keeps the length declared by the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatatypeRule {
    pub translate_from: String,
    #[serde(default)]
    pub translate_from_autoinc: bool,
    pub translate_to: String,
    #[serde(default = "default_size")]
    pub translate_to_size: i32,
}

fn default_size() -> i32 {
    -1
}

/// Kinds of objects a name rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    Column,
}

/// One object name remap. Source objects are always fully qualified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectNameRule {
    pub object_type: ObjectKind,
    pub source_object: String,
    pub destination_object: String,
}

/// One transform expression, keyed by fully qualified source column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionRule {
    pub transform_from: String,
    pub transform_expression: String,
}

/// The on-disk rule file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub transform_datatype_rules: Vec<DatatypeRule>,
    #[serde(default)]
    pub transform_objectname_rules: Vec<ObjectNameRule>,
    #[serde(default)]
    pub transform_expression_rules: Vec<ExpressionRule>,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
}

impl RuleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read rule file {}: {e}", path.display()))
        })?;
        let file: RuleFile = serde_json::from_str(&text)
            .map_err(|e| EngineError::config(format!("bad rule file {}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            datatype_rules = file.transform_datatype_rules.len(),
            name_rules = file.transform_objectname_rules.len(),
            expression_rules = file.transform_expression_rules.len(),
            "loaded rule file"
        );
        Ok(file)
    }
}

/// Compiled rule store: hash lookups, built once at connector start.
#[derive(Debug, Default)]
pub struct RuleStore {
    names: HashMap<(ObjectKind, String), String>,
    expressions: HashMap<String, String>,
    datatypes: Vec<DatatypeRule>,
    strategy: ErrorStrategy,
}

impl RuleStore {
    /// Empty store: every lookup falls through to its input.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_file(file: RuleFile) -> Self {
        let mut names = HashMap::new();
        for rule in &file.transform_objectname_rules {
            names.insert(
                (rule.object_type, rule.source_object.to_ascii_lowercase()),
                rule.destination_object.clone(),
            );
        }
        let mut expressions = HashMap::new();
        for rule in &file.transform_expression_rules {
            expressions.insert(
                rule.transform_from.to_ascii_lowercase(),
                rule.transform_expression.clone(),
            );
        }
        Self {
            names,
            expressions,
            datatypes: file.transform_datatype_rules,
            strategy: file.error_strategy,
        }
    }

    /// Load and compile from an optional path.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(Self::from_file(RuleFile::load(p)?)),
            None => Ok(Self::empty()),
        }
    }

    pub fn error_strategy(&self) -> ErrorStrategy {
        self.strategy
    }

    /// Datatype overrides to fold into the type registry.
    pub fn datatype_rules(&self) -> &[DatatypeRule] {
        &self.datatypes
    }

    /// Remapped destination id for a fully qualified table, if any.
    pub fn table_name(&self, fqid: &str) -> Option<&str> {
        self.names
            .get(&(ObjectKind::Table, fqid.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Remapped destination name for a fully qualified column, if any.
    pub fn column_name(&self, fq_column: &str) -> Option<&str> {
        self.names
            .get(&(ObjectKind::Column, fq_column.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Transform expression for a fully qualified column, if any.
    pub fn expression_for(&self, fq_column: &str) -> Option<&str> {
        self.expressions
            .get(&fq_column.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Substitute a decoded literal into an expression (`%d`).
pub fn render_expression(expr: &str, decoded: &str) -> String {
    expr.replace("%d", decoded)
}

/// Substitute geometry fields into an expression (`%w` = WKB, `%s` = SRID).
pub fn render_geometry_expression(expr: &str, wkb: &str, srid: &str) -> String {
    expr.replace("%w", wkb).replace("%s", srid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RuleStore {
        RuleStore::from_file(RuleFile {
            transform_datatype_rules: vec![DatatypeRule {
                translate_from: "GEOMETRY".into(),
                translate_from_autoinc: false,
                translate_to: "geometry".into(),
                translate_to_size: -1,
            }],
            transform_objectname_rules: vec![
                ObjectNameRule {
                    object_type: ObjectKind::Table,
                    source_object: "inv.orders".into(),
                    destination_object: "sales.orders".into(),
                },
                ObjectNameRule {
                    object_type: ObjectKind::Column,
                    source_object: "inv.orders.qty".into(),
                    destination_object: "quantity".into(),
                },
            ],
            transform_expression_rules: vec![ExpressionRule {
                transform_from: "inv.orders.note".into(),
                transform_expression: "upper(%d)".into(),
            }],
            error_strategy: ErrorStrategy::Exit,
        })
    }

    #[test]
    fn test_table_remap() {
        let s = store();
        assert_eq!(s.table_name("inv.orders"), Some("sales.orders"));
        assert_eq!(s.table_name("INV.ORDERS"), Some("sales.orders"));
        assert_eq!(s.table_name("inv.customers"), None);
    }

    #[test]
    fn test_column_remap_is_kind_scoped() {
        let s = store();
        assert_eq!(s.column_name("inv.orders.qty"), Some("quantity"));
        // a table rule never answers a column lookup
        assert_eq!(s.column_name("inv.orders"), None);
    }

    #[test]
    fn test_expression_lookup() {
        let s = store();
        assert_eq!(s.expression_for("inv.orders.note"), Some("upper(%d)"));
        assert_eq!(s.expression_for("inv.orders.qty"), None);
    }

    #[test]
    fn test_strategy_carried() {
        assert_eq!(store().error_strategy(), ErrorStrategy::Exit);
        assert_eq!(RuleStore::empty().error_strategy(), ErrorStrategy::Skip);
    }

    #[test]
    fn test_render_expression() {
        assert_eq!(render_expression("upper(%d)", "'abc'"), "upper('abc')");
        assert_eq!(
            render_geometry_expression("ST_GeomFromWKB(decode('%w','base64'),%s)", "AQID", "4326"),
            "ST_GeomFromWKB(decode('AQID','base64'),4326)"
        );
    }

    #[test]
    fn test_rule_file_defaults() {
        let file: RuleFile = serde_json::from_str("{}").unwrap();
        assert!(file.transform_datatype_rules.is_empty());
        assert_eq!(file.error_strategy, ErrorStrategy::Skip);
    }
}
