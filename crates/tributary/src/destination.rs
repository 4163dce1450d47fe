//! Destination engine seam
//!
//! The engine never talks to a database directly; it drives this trait. A
//! production implementation wraps the destination's transaction, SQL, and
//! tuple-level write facilities. [`crate::testing::MemoryDestination`]
//! implements it in memory for the test suite.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::common::{EngineError, Result};

/// Object identifier in the destination catalog.
pub type Oid = u32;

/// Widest length the destination accepts for a sized attribute.
pub const MAX_ATTRIBUTE_LEN: i32 = 10_485_760;

/// Destination type oids used by the decoder and translators.
pub mod typeoid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const JSON: Oid = 114;
    pub const XML: Oid = 142;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const MONEY: Oid = 790;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const BIT: Oid = 1560;
    pub const VARBIT: Oid = 1562;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// One attribute of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_oid: Oid,
    /// 1-based attribute position
    pub position: i32,
    /// Type modifier; length for sized types, `-1` when unsized
    pub typemod: i32,
    /// Dropped attributes keep their slot but take no values
    pub dropped: bool,
}

/// Ordered attribute layout of a destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleDescriptor {
    pub columns: Vec<ColumnMeta>,
}

impl TupleDescriptor {
    /// Attributes that still take values.
    pub fn active(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| !c.dropped)
    }

    pub fn active_len(&self) -> usize {
        self.active().count()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.active().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// An open destination table.
#[derive(Debug, Clone)]
pub struct TableHandle {
    pub oid: Oid,
    pub descriptor: TupleDescriptor,
    /// 0-based positions of primary key attributes; empty = no key
    pub pk_positions: Vec<usize>,
}

/// Destination engine operations consumed by the applier and translators.
///
/// Each `apply_*` call on the applier wraps its work in one
/// `begin_txn` / `commit_txn` pair; implementations must make `abort_txn`
/// safe to call after a failed statement.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn begin_txn(&self) -> Result<()>;
    async fn commit_txn(&self) -> Result<()>;
    async fn abort_txn(&self) -> Result<()>;

    /// Run a statement through the destination's SQL facility.
    async fn execute_sql(&self, sql: &str) -> Result<()>;

    /// Evaluate a scalar expression and return its textual result.
    /// Used for transform expressions on the tuple path.
    async fn eval_scalar(&self, expr: &str) -> Result<String>;

    async fn get_namespace_oid(&self, name: &str) -> Result<Option<Oid>>;
    async fn get_table_oid(&self, namespace: Oid, name: &str) -> Result<Option<Oid>>;

    /// Open a table for tuple-level access; no lock beyond the
    /// destination's default write lock is taken.
    async fn open_table(&self, oid: Oid) -> Result<TableHandle>;
    async fn close_table(&self, handle: TableHandle) -> Result<()>;

    async fn insert_tuple(&self, handle: &TableHandle, row: &[Option<String>]) -> Result<()>;

    /// Locate by primary key index and replace. `Ok(false)` = no live row.
    async fn update_tuple_by_index(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<bool>;

    /// Locate by full before-image scan and replace. `Ok(false)` = no live row.
    async fn update_tuple_by_seq_scan(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<bool>;

    async fn delete_tuple_by_index(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
    ) -> Result<bool>;

    async fn delete_tuple_by_seq_scan(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
    ) -> Result<bool>;
}

/// Cached catalog facts for one destination table.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub table_oid: Oid,
    pub descriptor: TupleDescriptor,
    pub pk_positions: Vec<usize>,
    /// column name (lowercased) → (type oid, 0-based slot among active
    /// attributes, typemod)
    pub by_name: HashMap<String, (Oid, usize, i32)>,
}

/// Per-connector catalog cache, keyed by destination `(schema, table)`.
///
/// Owned by one supervisor task; populated lazily on first use and
/// invalidated whenever a DDL touches the same table.
#[derive(Debug, Default)]
pub struct DataCache {
    entries: HashMap<(String, String), Arc<CacheEntry>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a table through the cache, probing the destination catalog on
    /// a miss. Both name components fold to lowercase.
    pub async fn lookup(
        &mut self,
        dest: &dyn Destination,
        schema: &str,
        table: &str,
    ) -> Result<Arc<CacheEntry>> {
        let key = (schema.to_ascii_lowercase(), table.to_ascii_lowercase());
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(entry));
        }

        let ns = dest
            .get_namespace_oid(&key.0)
            .await?
            .ok_or_else(|| EngineError::catalog(format!("schema \"{}\" does not exist", key.0)))?;
        let oid = dest.get_table_oid(ns, &key.1).await?.ok_or_else(|| {
            EngineError::catalog(format!("table \"{}.{}\" does not exist", key.0, key.1))
        })?;

        let handle = dest.open_table(oid).await?;
        let mut by_name = HashMap::new();
        for (slot, col) in handle.descriptor.active().enumerate() {
            by_name.insert(
                col.name.to_ascii_lowercase(),
                (col.type_oid, slot, col.typemod),
            );
        }
        let entry = Arc::new(CacheEntry {
            table_oid: oid,
            descriptor: handle.descriptor.clone(),
            pk_positions: handle.pk_positions.clone(),
            by_name,
        });
        dest.close_table(handle).await?;

        debug!(schema = %key.0, table = %key.1, oid, "cached table layout");
        self.entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Drop the entry for a table. Called before any DDL touching it applies.
    pub fn invalidate(&mut self, schema: &str, table: &str) {
        self.entries
            .remove(&(schema.to_ascii_lowercase(), table.to_ascii_lowercase()));
    }

    pub fn contains(&self, schema: &str, table: &str) -> bool {
        self.entries
            .contains_key(&(schema.to_ascii_lowercase(), table.to_ascii_lowercase()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
