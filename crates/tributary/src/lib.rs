//! # tributary - CDC apply engine
//!
//! Consumes Debezium-style JSON change events from an external producer and
//! applies the equivalent schema and row changes to a destination
//! relational engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   fetch    ┌──────────────────────────────┐
//! │   Producer   │ ─────────▶ │     Connector Supervisor     │
//! │ (per source) │   events   │  (one task per connector)    │
//! └──────────────┘            └──────┬───────────────────────┘
//!                                    │ classify
//!                      ┌─────────────┴─────────────┐
//!                      ▼                           ▼
//!              ┌──────────────┐            ┌──────────────┐
//!              │ DDL          │            │ DML          │
//!              │ translator   │            │ translator   │
//!              └──────┬───────┘            └──────┬───────┘
//!                     │   type map · name rules   │
//!                     │   value decoder           │
//!                     └─────────────┬─────────────┘
//!                                   ▼
//!                            ┌──────────────┐
//!                            │   Applier    │──▶ destination engine
//!                            └──────────────┘
//! ```
//!
//! The producer and the destination are seams ([`producer::EventProducer`],
//! [`destination::Destination`]); the engine performs no database I/O of its
//! own. Supervisors publish state, stage, errors, and offsets through the
//! [`status::StatusRegistry`], which admin surfaces observe and control.

pub mod apply;
pub mod common;
pub mod config;
pub mod ddl;
pub mod decode;
pub mod destination;
pub mod dml;
pub mod event;
pub mod producer;
pub mod rules;
pub mod status;
pub mod supervisor;
pub mod testing;
pub mod typemap;

mod mysql;
mod oracle;
mod sqlserver;

pub use apply::{Applier, ApplyOutcome};
pub use common::{EngineError, ErrorStrategy, Result};
pub use config::{ConnectorConfig, EmitMode, SnapshotMode, SourceFlavor};
pub use destination::{DataCache, Destination, Oid, TableHandle, TupleDescriptor};
pub use producer::{EventProducer, OffsetStore};
pub use status::{ConnectorStage, ConnectorState, StatusRegistry, StatusSnapshot};
pub use supervisor::Supervisor;
