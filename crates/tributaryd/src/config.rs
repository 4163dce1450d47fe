//! Daemon configuration
//!
//! One YAML file declares every connector the daemon runs. Each entry
//! carries the engine's connector fields plus the daemon's wiring: where
//! the replayed events come from, where translated SQL goes, and the
//! destination table layouts the preview catalog serves.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tributary::config::ConnectorConfig;

/// Root of the daemon's YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub connectors: Vec<ConnectorEntry>,
}

/// One connector: engine config plus daemon wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorEntry {
    #[serde(flatten)]
    pub engine: ConnectorConfig,

    /// Newline-delimited JSON change events to replay
    pub events_file: PathBuf,

    /// Translated SQL sink; stdout when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,

    /// Extra producer parameters, passed through opaquely
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,

    /// Destination table layouts served to the translators
    #[serde(default)]
    pub tables: Vec<TableDecl>,
}

/// Declared layout of one destination table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDecl {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnDecl>,
}

fn default_schema() -> String {
    "public".to_string()
}

/// One declared column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_length")]
    pub length: i32,
}

fn default_length() -> i32 {
    -1
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: DaemonConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("bad config {}", path.display()))?;
        Ok(config)
    }

    /// Validate every connector; returns the list of problems found.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for entry in &self.connectors {
            if let Err(e) = entry.engine.check() {
                problems.push(e.to_string());
            }
            if !entry.events_file.is_file() {
                problems.push(format!(
                    "connector '{}': events file {} does not exist",
                    entry.engine.name,
                    entry.events_file.display()
                ));
            }
        }
        let mut names: Vec<&str> = self.connectors.iter().map(|c| c.engine.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.connectors.len() {
            problems.push("connector names are not unique".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
connectors:
  - name: mysqlconn
    flavor: mysql
    host: 127.0.0.1
    port: 3306
    user: repl
    credential: secret
    source_database: inventory
    destination_database: warehouse
    emit_mode: sql
    events_file: /tmp/events.ndjson
    tables:
      - schema: inv
        table: orders
        primary_key: [order_number]
        columns:
          - {name: order_number, type: int}
          - {name: quantity, type: int}
          - {name: product, type: varchar, length: 64}
"#;

    #[test]
    fn test_parse_sample() {
        let config: DaemonConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.connectors.len(), 1);
        let entry = &config.connectors[0];
        assert_eq!(entry.engine.name, "mysqlconn");
        assert_eq!(entry.tables[0].columns.len(), 3);
        assert_eq!(entry.tables[0].columns[2].length, 64);
        assert_eq!(entry.tables[0].primary_key, vec!["order_number"]);
        assert!(entry.output_file.is_none());
    }

    #[test]
    fn test_problems_flags_missing_events_file() {
        let config: DaemonConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let problems = config.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("events file"));
    }
}
