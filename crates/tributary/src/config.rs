//! Connector configuration
//!
//! A [`ConnectorConfig`] binds one upstream database to one destination
//! database. It is immutable while a supervisor owns it; the daemon loads a
//! set of them from YAML and hands each to its own supervisor task.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::common::{EngineError, Result};

/// Upstream database flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SourceFlavor {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "sqlserver")]
    SqlServer,
    #[serde(rename = "oracle")]
    Oracle,
}

impl SourceFlavor {
    /// Lowercase name used in offset file names and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFlavor::MySql => "mysql",
            SourceFlavor::SqlServer => "sqlserver",
            SourceFlavor::Oracle => "oracle",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(SourceFlavor::MySql),
            "sqlserver" | "mssql" => Ok(SourceFlavor::SqlServer),
            "oracle" => Ok(SourceFlavor::Oracle),
            other => Err(EngineError::config(format!(
                "unsupported source flavor: '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for SourceFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer-controlled snapshot policy.
///
/// Passed through to the producer verbatim; the engine only inspects it to
/// label the connector stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    #[default]
    Initial,
    InitialOnly,
    Never,
    NoData,
    Always,
    #[serde(rename = "schemasync")]
    SchemaSync,
}

impl SnapshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotMode::Initial => "initial",
            SnapshotMode::InitialOnly => "initial_only",
            SnapshotMode::Never => "never",
            SnapshotMode::NoData => "no_data",
            SnapshotMode::Always => "always",
            SnapshotMode::SchemaSync => "schemasync",
        }
    }
}

/// How translated DML leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmitMode {
    /// Decoded positional values handed to the destination's tuple primitives
    #[default]
    Tuple,
    /// A textual SQL statement run through the destination's SQL facility
    Sql,
}

fn default_nap_ms() -> u64 {
    5_000
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from("tributary_meta")
}

/// Immutable per-connector descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ConnectorConfig {
    /// Unique connector name; keys the status slot and the offset file
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    /// Upstream flavor
    pub flavor: SourceFlavor,

    /// Upstream host
    #[validate(length(min = 1))]
    pub host: String,

    /// Upstream port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Upstream user
    #[validate(length(min = 1))]
    pub user: String,

    /// Upstream credential, passed to the producer verbatim
    pub credential: String,

    /// Source database to capture
    #[validate(length(min = 1))]
    pub source_database: String,

    /// Destination database to apply into
    #[validate(length(min = 1))]
    pub destination_database: String,

    /// Tables to capture (glob patterns; empty = all)
    #[serde(default)]
    pub table_include_list: Vec<String>,

    /// Snapshot policy handed to the producer
    #[serde(default)]
    pub snapshot_mode: SnapshotMode,

    /// DML emission mode
    #[serde(default)]
    pub emit_mode: EmitMode,

    /// Optional rule file with type/name/expression overrides
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Directory for offset files; created at start if missing
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    /// Idle nap between loop iterations, in milliseconds
    #[serde(default = "default_nap_ms")]
    pub nap_ms: u64,
}

impl ConnectorConfig {
    /// Validate and normalize; returns a `Config` error on bad input.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| EngineError::config(format!("connector '{}': {e}", self.name)))
    }

    /// Offset file name for this connector: `<flavor>_<name>_offsets.dat`.
    pub fn offset_file_name(&self) -> String {
        format!("{}_{}_offsets.dat", self.flavor.as_str(), self.name)
    }
}
