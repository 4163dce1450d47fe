//! Test support: an in-memory destination and a scripted producer.
//!
//! Both are real implementations of the engine's seams, small enough to
//! assert against. The memory destination keeps rows as decoded text
//! fields and records every SQL statement and evaluated expression; the
//! scripted producer replays pre-loaded batches and tracks offsets the way
//! a capture process would.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::common::{EngineError, Result};
use crate::config::ConnectorConfig;
use crate::destination::{ColumnMeta, Destination, Oid, TableHandle, TupleDescriptor};
use crate::producer::EventProducer;

// ============================================================================
// Memory destination
// ============================================================================

#[derive(Debug, Clone)]
struct MemTable {
    descriptor: TupleDescriptor,
    pk_positions: Vec<usize>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default)]
struct MemState {
    next_oid: Oid,
    namespaces: HashMap<String, Oid>,
    table_names: HashMap<(Oid, String), Oid>,
    tables: HashMap<Oid, MemTable>,
    sql_log: Vec<String>,
    expr_log: Vec<String>,
    fail_next_sql: Option<String>,
    commits: u64,
    aborts: u64,
}

/// In-memory [`Destination`].
///
/// SQL statements are recorded, not interpreted; the tuple primitives do
/// real row work. `eval_scalar` echoes the expression back so tests can
/// assert what would have reached the destination's evaluator.
#[derive(Debug, Default)]
pub struct MemoryDestination {
    state: Mutex<MemState>,
}

impl MemoryDestination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemState {
                next_oid: 16_384,
                ..MemState::default()
            }),
        })
    }

    /// Seed a namespace; returns its oid. Idempotent.
    pub fn create_namespace(&self, name: &str) -> Oid {
        let mut state = self.state.lock();
        if let Some(oid) = state.namespaces.get(&name.to_ascii_lowercase()) {
            return *oid;
        }
        let oid = state.next_oid;
        state.next_oid += 1;
        state.namespaces.insert(name.to_ascii_lowercase(), oid);
        oid
    }

    /// Seed a table with `(name, type oid, typemod)` columns and a primary
    /// key named by column; returns the table oid.
    pub fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[(&str, Oid, i32)],
        pk: &[&str],
    ) -> Oid {
        let ns = self.create_namespace(schema);
        let descriptor = TupleDescriptor {
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, (name, type_oid, typemod))| ColumnMeta {
                    name: (*name).to_string(),
                    type_oid: *type_oid,
                    position: i as i32 + 1,
                    typemod: *typemod,
                    dropped: false,
                })
                .collect(),
        };
        let pk_positions = pk
            .iter()
            .filter_map(|key| columns.iter().position(|(name, _, _)| name == key))
            .collect();

        let mut state = self.state.lock();
        let oid = state.next_oid;
        state.next_oid += 1;
        state
            .table_names
            .insert((ns, table.to_ascii_lowercase()), oid);
        state.tables.insert(
            oid,
            MemTable {
                descriptor,
                pk_positions,
                rows: Vec::new(),
            },
        );
        oid
    }

    /// Insert a row directly, bypassing the applier.
    pub fn seed_row(&self, oid: Oid, row: Vec<Option<String>>) {
        if let Some(table) = self.state.lock().tables.get_mut(&oid) {
            table.rows.push(row);
        }
    }

    pub fn rows(&self, oid: Oid) -> Vec<Vec<Option<String>>> {
        self.state
            .lock()
            .tables
            .get(&oid)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state.lock().sql_log.clone()
    }

    pub fn evaluated_expressions(&self) -> Vec<String> {
        self.state.lock().expr_log.clone()
    }

    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    pub fn aborts(&self) -> u64 {
        self.state.lock().aborts
    }

    /// Make the next `execute_sql` call fail with `message`.
    pub fn fail_next_sql(&self, message: &str) {
        self.state.lock().fail_next_sql = Some(message.to_string());
    }

    fn rows_match_at(row: &[Option<String>], probe: &[Option<String>], slots: &[usize]) -> bool {
        slots
            .iter()
            .all(|&slot| row.get(slot) == probe.get(slot))
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn begin_txn(&self) -> Result<()> {
        Ok(())
    }

    async fn commit_txn(&self) -> Result<()> {
        self.state.lock().commits += 1;
        Ok(())
    }

    async fn abort_txn(&self) -> Result<()> {
        self.state.lock().aborts += 1;
        Ok(())
    }

    async fn execute_sql(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_sql.take() {
            return Err(EngineError::apply(message));
        }
        state.sql_log.push(sql.to_string());
        Ok(())
    }

    async fn eval_scalar(&self, expr: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.expr_log.push(expr.to_string());
        Ok(expr.to_string())
    }

    async fn get_namespace_oid(&self, name: &str) -> Result<Option<Oid>> {
        Ok(self
            .state
            .lock()
            .namespaces
            .get(&name.to_ascii_lowercase())
            .copied())
    }

    async fn get_table_oid(&self, namespace: Oid, name: &str) -> Result<Option<Oid>> {
        Ok(self
            .state
            .lock()
            .table_names
            .get(&(namespace, name.to_ascii_lowercase()))
            .copied())
    }

    async fn open_table(&self, oid: Oid) -> Result<TableHandle> {
        let state = self.state.lock();
        let table = state
            .tables
            .get(&oid)
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {oid}")))?;
        Ok(TableHandle {
            oid,
            descriptor: table.descriptor.clone(),
            pk_positions: table.pk_positions.clone(),
        })
    }

    async fn close_table(&self, _handle: TableHandle) -> Result<()> {
        Ok(())
    }

    async fn insert_tuple(&self, handle: &TableHandle, row: &[Option<String>]) -> Result<()> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(&handle.oid)
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {}", handle.oid)))?;
        if row.len() != table.descriptor.active_len() {
            return Err(EngineError::apply(format!(
                "row has {} fields, table {} expects {}",
                row.len(),
                handle.oid,
                table.descriptor.active_len()
            )));
        }
        table.rows.push(row.to_vec());
        Ok(())
    }

    async fn update_tuple_by_index(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(&handle.oid)
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {}", handle.oid)))?;
        let pk = table.pk_positions.clone();
        if let Some(row) = table
            .rows
            .iter_mut()
            .find(|row| Self::rows_match_at(row, before, &pk))
        {
            *row = after.to_vec();
            return Ok(true);
        }
        Ok(false)
    }

    async fn update_tuple_by_seq_scan(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(&handle.oid)
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {}", handle.oid)))?;
        if let Some(row) = table.rows.iter_mut().find(|row| row.as_slice() == before) {
            *row = after.to_vec();
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_tuple_by_index(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(&handle.oid)
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {}", handle.oid)))?;
        let pk = table.pk_positions.clone();
        let len_before = table.rows.len();
        if let Some(index) = table
            .rows
            .iter()
            .position(|row| Self::rows_match_at(row, before, &pk))
        {
            table.rows.remove(index);
        }
        Ok(table.rows.len() < len_before)
    }

    async fn delete_tuple_by_seq_scan(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(&handle.oid)
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {}", handle.oid)))?;
        let len_before = table.rows.len();
        if let Some(index) = table.rows.iter().position(|row| row.as_slice() == before) {
            table.rows.remove(index);
        }
        Ok(table.rows.len() < len_before)
    }
}

// ============================================================================
// Scripted producer
// ============================================================================

#[derive(Debug, Default)]
struct ProducerState {
    batches: VecDeque<Vec<String>>,
    delivered: u64,
    offset: String,
    offsets_written: Vec<String>,
    started: bool,
    start_count: u32,
    stopped: bool,
    can_redeliver: bool,
    last_batch: Option<Vec<String>>,
}

/// [`EventProducer`] that replays pre-loaded batches.
///
/// Clones share state, so a test can keep one handle while the supervisor
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProducer {
    state: Arc<Mutex<ProducerState>>,
}

impl ScriptedProducer {
    pub fn new(batches: Vec<Vec<String>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProducerState {
                batches: batches.into_iter().collect(),
                offset: "pos-0".to_string(),
                ..ProducerState::default()
            })),
        }
    }

    /// Allow `request_redelivery` to succeed by replaying the last batch.
    pub fn with_redelivery(self) -> Self {
        self.state.lock().can_redeliver = true;
        self
    }

    pub fn push_batch(&self, batch: Vec<String>) {
        self.state.lock().batches.push_back(batch);
    }

    pub fn started(&self) -> bool {
        self.state.lock().started
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// How many times `start` has been called.
    pub fn start_count(&self) -> u32 {
        self.state.lock().start_count
    }

    pub fn remaining_batches(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// Offsets the engine wrote back through `set_offset`.
    pub fn offsets_written(&self) -> Vec<String> {
        self.state.lock().offsets_written.clone()
    }
}

#[async_trait]
impl EventProducer for ScriptedProducer {
    async fn start(&mut self, _config: &ConnectorConfig) -> Result<()> {
        let mut state = self.state.lock();
        state.started = true;
        state.start_count += 1;
        state.stopped = false;
        Ok(())
    }

    async fn fetch_events(&mut self) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        match state.batches.pop_front() {
            Some(batch) => {
                state.delivered += batch.len() as u64;
                state.offset = format!("pos-{}", state.delivered);
                state.last_batch = Some(batch.clone());
                Ok(batch)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn get_offset(&mut self) -> Result<String> {
        Ok(self.state.lock().offset.clone())
    }

    async fn set_offset(&mut self, offset: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.offset = offset.to_string();
        state.offsets_written.push(offset.to_string());
        Ok(())
    }

    async fn request_redelivery(&mut self) -> bool {
        let mut state = self.state.lock();
        if !state.can_redeliver {
            return false;
        }
        if let Some(batch) = state.last_batch.take() {
            state.batches.push_front(batch);
            true
        } else {
            false
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.state.lock().stopped = true;
        Ok(())
    }
}
