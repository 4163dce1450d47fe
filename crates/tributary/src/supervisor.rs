//! Connector supervisor
//!
//! One long-running task per connector. The supervisor owns the producer,
//! the catalog cache, and the offset store; it is the only writer of its
//! connector's status slot. Each loop iteration drains at most one control
//! request, pulls a batch while syncing, and naps on a latch that admin
//! calls can poke to wake it early.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::apply::{Applier, ApplyOutcome};
use crate::common::stats::ConnectorStats;
use crate::common::{EngineError, ErrorStrategy, IncludeList, Result};
use crate::config::{ConnectorConfig, SnapshotMode};
use crate::ddl::{parse_ddl, translate_ddl, DdlKind};
use crate::destination::{DataCache, Destination, TupleDescriptor};
use crate::dml::DmlTranslator;
use crate::event::{classify, parse_envelope, parse_source, producer_ts_ms, EventKind, SnapshotMarker};
use crate::producer::{EventProducer, OffsetStore};
use crate::rules::RuleStore;
use crate::status::{ConnectorStage, ConnectorState, Request, StatusRegistry};
use crate::typemap::TypeRegistry;

/// Bound on producer shutdown before the task gives up and exits.
pub const PRODUCER_STOP_TIMEOUT: Duration = Duration::from_secs(100);

/// Grace given to a hard admin stop before the task is torn down.
pub const ADMIN_STOP_GRACE: Duration = Duration::from_secs(5);

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

enum Disposition {
    Applied,
    Skipped,
}

/// Per-connector supervisor task.
pub struct Supervisor {
    config: ConnectorConfig,
    rules: RuleStore,
    types: TypeRegistry,
    producer: Box<dyn EventProducer>,
    applier: Applier,
    registry: Arc<StatusRegistry>,
    stats: Arc<ConnectorStats>,
    cache: DataCache,
    offsets: OffsetStore,
    include: IncludeList,
    strategy: ErrorStrategy,
    latch: Arc<Notify>,
    state: ConnectorState,
    pid: u32,
    /// Any batch applied yet; drives schema-sync completion
    applied_any: bool,
}

impl Supervisor {
    pub fn new(
        config: ConnectorConfig,
        producer: Box<dyn EventProducer>,
        destination: Arc<dyn Destination>,
        registry: Arc<StatusRegistry>,
    ) -> Result<Self> {
        config.check()?;
        let rules = RuleStore::load(config.rules_file.as_deref())?;
        let mut types = TypeRegistry::for_flavor(config.flavor);
        types.apply_rules(rules.datatype_rules());
        let include = IncludeList::compile(&config.table_include_list)
            .map_err(|e| EngineError::config(format!("bad table include pattern: {e}")))?;
        let offsets = OffsetStore::for_connector(&config);
        let strategy = rules.error_strategy();

        Ok(Self {
            config,
            rules,
            types,
            producer,
            applier: Applier::new(destination),
            registry,
            stats: Arc::new(ConnectorStats::new()),
            cache: DataCache::new(),
            offsets,
            include,
            strategy,
            latch: Arc::new(Notify::new()),
            state: ConnectorState::Undef,
            pid: std::process::id(),
            applied_any: false,
        })
    }

    /// Latch handle; poking it wakes the loop out of its nap.
    pub fn latch(&self) -> Arc<Notify> {
        Arc::clone(&self.latch)
    }

    pub fn stats(&self) -> Arc<ConnectorStats> {
        Arc::clone(&self.stats)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run until shutdown. Claims the status slot, drives the loop, and
    /// always tears the producer down and releases the slot on the way out.
    pub async fn run(mut self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        if let Err(e) = self.startup().await {
            error!(connector = %self.config.name, error = %e, "connector failed to start");
            self.registry.set_error(&self.config.name, &e.to_string());
            self.registry
                .set_state(&self.config.name, ConnectorState::Stopped);
            self.registry.release(&self.config.name, self.pid);
            return Err(e);
        }

        let result = self.run_loop(shutdown).await;
        if let Err(e) = &result {
            error!(connector = %self.config.name, error = %e, "connector stopped on error");
            self.registry.set_error(&self.config.name, &e.to_string());
        }
        self.teardown().await;
        result
    }

    async fn startup(&mut self) -> Result<()> {
        self.registry
            .claim(
                &self.config.name,
                self.pid,
                self.config.snapshot_mode,
                &self.config.source_database,
                &self.config.destination_database,
                Arc::clone(&self.stats),
            )
            .map_err(|e| EngineError::config(format!("connector '{}': {e}", self.config.name)))?;
        self.enter_state(ConnectorState::Initializing);

        self.offsets.ensure_dir().await?;
        self.producer.start(&self.config).await?;

        if let Some(offset) = self.offsets.load().await? {
            info!(connector = %self.config.name, "restoring persisted offset");
            self.producer.set_offset(&offset).await?;
            self.registry.set_offset(&self.config.name, &offset);
        }

        if self.config.snapshot_mode == SnapshotMode::SchemaSync {
            self.registry
                .set_stage(&self.config.name, ConnectorStage::SchemaSync);
        }
        self.enter_state(ConnectorState::Syncing);
        info!(connector = %self.config.name, flavor = %self.config.flavor, "connector started");
        Ok(())
    }

    async fn run_loop(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(connector = %self.config.name, "shutdown requested");
                    return Ok(());
                }
                Err(_) => {}
            }

            // at most one control request per iteration; the slot is always
            // left clear afterwards
            if let Some(request) = self.registry.take_request(&self.config.name) {
                if self.handle_request(request).await? {
                    return Ok(());
                }
            }

            if self.state == ConnectorState::Syncing {
                let events = self.producer.fetch_events().await?;
                if events.is_empty() {
                    self.maybe_finish_schema_sync();
                } else {
                    self.process_batch(&events).await?;
                }
            }

            tokio::select! {
                _ = self.latch.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(self.config.nap_ms)) => {}
                _ = shutdown.recv() => {
                    info!(connector = %self.config.name, "shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    async fn teardown(&mut self) {
        match tokio::time::timeout(PRODUCER_STOP_TIMEOUT, self.producer.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(connector = %self.config.name, error = %e, "producer stop failed"),
            Err(_) => {
                warn!(connector = %self.config.name, "producer stop timed out; abandoning task")
            }
        }
        self.registry
            .set_state(&self.config.name, ConnectorState::Stopped);
        self.registry.release(&self.config.name, self.pid);
        info!(connector = %self.config.name, "connector stopped");
    }

    fn enter_state(&mut self, state: ConnectorState) {
        self.state = state;
        self.registry.set_state(&self.config.name, state);
    }

    /// Apply one control request. Returns `true` when the task must stop.
    async fn handle_request(&mut self, request: Request) -> Result<bool> {
        match (self.state, request.state) {
            (ConnectorState::Syncing, ConnectorState::Paused) => {
                info!(connector = %self.config.name, "paused");
                self.enter_state(ConnectorState::Paused);
            }
            (ConnectorState::Paused, ConnectorState::Syncing) => {
                info!(connector = %self.config.name, "resumed");
                self.enter_state(ConnectorState::Syncing);
            }
            (ConnectorState::Paused, ConnectorState::OffsetUpdate) => {
                let offset = request.data.unwrap_or_default();
                self.enter_state(ConnectorState::OffsetUpdate);
                self.producer.set_offset(&offset).await?;
                self.offsets.save(&offset).await?;
                self.registry.set_offset(&self.config.name, &offset);
                info!(connector = %self.config.name, "offset rewritten");
                self.enter_state(ConnectorState::Paused);
            }
            (_, ConnectorState::Stopped) => {
                info!(connector = %self.config.name, "stop requested");
                return Ok(true);
            }
            (ConnectorState::Syncing | ConnectorState::Paused, ConnectorState::Restarting) => {
                info!(connector = %self.config.name, "restarting producer");
                self.enter_state(ConnectorState::Restarting);
                match tokio::time::timeout(PRODUCER_STOP_TIMEOUT, self.producer.stop()).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(EngineError::producer(
                            "producer stop timed out during restart",
                        ))
                    }
                }
                self.producer.start(&self.config).await?;
                if let Some(offset) = self.offsets.load().await? {
                    self.producer.set_offset(&offset).await?;
                }
                self.enter_state(ConnectorState::Syncing);
            }
            (ConnectorState::Syncing | ConnectorState::Paused, ConnectorState::ReloadRules) => {
                let previous = self.state;
                self.enter_state(ConnectorState::ReloadRules);
                self.rules = RuleStore::load(self.config.rules_file.as_deref())?;
                let mut types = TypeRegistry::for_flavor(self.config.flavor);
                types.apply_rules(self.rules.datatype_rules());
                self.types = types;
                self.strategy = self.rules.error_strategy();
                info!(connector = %self.config.name, "rules reloaded");
                self.enter_state(previous);
            }
            (current, requested) => {
                warn!(
                    connector = %self.config.name,
                    %current,
                    %requested,
                    "ignoring request: transition not allowed"
                );
            }
        }
        Ok(false)
    }

    fn maybe_finish_schema_sync(&mut self) {
        if self.config.snapshot_mode == SnapshotMode::SchemaSync && self.applied_any {
            info!(connector = %self.config.name, "schema sync complete");
            self.enter_state(ConnectorState::SchemaSyncDone);
        }
    }

    async fn process_batch(&mut self, events: &[String]) -> Result<()> {
        self.stats.begin_batch();
        debug!(connector = %self.config.name, len = events.len(), "processing batch");

        for raw in events {
            match self.process_event(raw).await {
                Ok(Disposition::Applied) => {
                    self.stats.record_event();
                    self.applied_any = true;
                    let offset = self.producer.get_offset().await?;
                    self.offsets.save(&offset).await?;
                    self.registry.set_offset(&self.config.name, &offset);
                }
                Ok(Disposition::Skipped) => {
                    self.stats.record_event();
                }
                Err(e) if e.is_event_scoped() => {
                    self.stats.record_event();
                    self.registry.set_error(&self.config.name, &e.to_string());
                    match self.strategy {
                        ErrorStrategy::Skip => {
                            warn!(connector = %self.config.name, error = %e, "skipping bad event");
                            self.stats.record_bad_event();
                        }
                        ErrorStrategy::Exit => {
                            return Err(e);
                        }
                        ErrorStrategy::Retry => {
                            if self.producer.request_redelivery().await {
                                warn!(connector = %self.config.name, error = %e, "requeueing batch after error");
                                tokio::time::sleep(RETRY_BACKOFF).await;
                                break;
                            }
                            warn!(connector = %self.config.name, error = %e, "redelivery unavailable; skipping bad event");
                            self.stats.record_bad_event();
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.enter_state(ConnectorState::Syncing);
        Ok(())
    }

    async fn process_event(&mut self, raw: &str) -> Result<Disposition> {
        self.enter_state(ConnectorState::Parsing);
        let envelope = parse_envelope(raw)?;

        match classify(&envelope) {
            EventKind::Ddl => self.process_ddl(&envelope).await,
            EventKind::Dml => self.process_dml(&envelope).await,
            EventKind::Other => {
                debug!(connector = %self.config.name, "ignoring non-change event");
                Ok(Disposition::Skipped)
            }
        }
    }

    fn update_stage(&mut self, marker: SnapshotMarker) {
        if self.config.snapshot_mode == SnapshotMode::SchemaSync {
            return;
        }
        let stage = match marker {
            SnapshotMarker::InSnapshot | SnapshotMarker::Last => ConnectorStage::InitialSnapshot,
            SnapshotMarker::Streaming => ConnectorStage::ChangeDataCapture,
        };
        self.registry.set_stage(&self.config.name, stage);
    }

    async fn process_ddl(&mut self, envelope: &serde_json::Value) -> Result<Disposition> {
        let Some(record) = parse_ddl(envelope)? else {
            debug!(connector = %self.config.name, "schema event carried no table change");
            return Ok(Disposition::Skipped);
        };

        if !self.admits_source_id(&record.fqid) {
            debug!(connector = %self.config.name, table = %record.fqid, "table not in include list");
            return Ok(Disposition::Skipped);
        }
        if let Ok(source) = parse_source(envelope) {
            self.update_stage(source.snapshot);
        }

        self.enter_state(ConnectorState::Converting);
        let existing = if record.kind == DdlKind::Alter {
            Some(self.existing_descriptor(&record).await?)
        } else {
            None
        };
        let translated = translate_ddl(&record, &self.rules, &self.types, existing.as_ref())?;

        // the layout changes under us; never serve stale catalog facts
        let (schema, table) = translated.cache_key();
        self.cache.invalidate(&schema, &table);

        self.enter_state(ConnectorState::Executing);
        self.applier.apply_ddl(&translated).await?;
        self.stats.record_ddl();

        let source_ts = parse_source(envelope).ok().and_then(|s| s.ts_ms);
        self.stats.mark_event(source_ts, producer_ts_ms(envelope));
        Ok(Disposition::Applied)
    }

    async fn process_dml(&mut self, envelope: &serde_json::Value) -> Result<Disposition> {
        let source = parse_source(envelope)?;
        let table = source.table.clone().unwrap_or_default();
        let schema_part = source.schema.clone().unwrap_or_else(|| source.db.clone());
        if !self.include.admits(&schema_part, &table) {
            debug!(connector = %self.config.name, schema = %schema_part, table = %table, "table not in include list");
            return Ok(Disposition::Skipped);
        }
        if self.config.snapshot_mode == SnapshotMode::SchemaSync {
            return Ok(Disposition::Skipped);
        }
        self.update_stage(source.snapshot);

        self.enter_state(ConnectorState::Converting);
        let dest = Arc::clone(self.applier.destination());
        let translated = {
            let translator = DmlTranslator::new(&self.rules, self.config.emit_mode);
            translator
                .translate(envelope, &mut self.cache, dest.as_ref())
                .await?
        };

        self.enter_state(ConnectorState::Executing);
        match self.applier.apply_dml(&translated).await? {
            ApplyOutcome::Applied => {
                self.stats.record_dml(translated.op.letter());
            }
            ApplyOutcome::RowNotFound(what) => {
                self.stats.record_bad_event();
                self.registry.set_error(&self.config.name, what);
            }
        }

        self.stats.mark_event(source.ts_ms, producer_ts_ms(envelope));
        Ok(Disposition::Applied)
    }

    /// Include-list check for DDL, which names tables by source id.
    fn admits_source_id(&self, fqid: &str) -> bool {
        let parts: Vec<&str> = fqid.split('.').collect();
        match parts.as_slice() {
            [table] => self.include.admits("", table),
            [schema, table] => self.include.admits(schema, table),
            [_, schema, table] => self.include.admits(schema, table),
            _ => true,
        }
    }

    /// Current destination layout of the table an ALTER touches.
    async fn existing_descriptor(&mut self, record: &crate::ddl::DdlRecord) -> Result<TupleDescriptor> {
        let mapped = self
            .rules
            .table_name(&record.fqid)
            .unwrap_or(&record.fqid)
            .to_string();
        let parts: Vec<&str> = mapped.split('.').filter(|p| !p.is_empty()).collect();
        let (schema, table) = match parts.as_slice() {
            [table] => ("public".to_string(), (*table).to_string()),
            [schema, table] => ((*schema).to_string(), (*table).to_string()),
            [_, schema, table] => ((*schema).to_string(), (*table).to_string()),
            _ => {
                return Err(EngineError::parse(format!(
                    "table id '{mapped}' does not name a table"
                )))
            }
        };
        let dest = Arc::clone(self.applier.destination());
        let entry = self.cache.lookup(dest.as_ref(), &schema, &table).await?;
        Ok(entry.descriptor.clone())
    }
}
