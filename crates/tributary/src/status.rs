//! Shared status surface
//!
//! One process-wide table of per-connector slots behind a single
//! reader-writer lock. Supervisors claim a slot at start and are its only
//! writer for state, stage, error, and offset; external controllers observe
//! snapshots and post requests into a single-slot mailbox that only the
//! supervisor drains.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::common::stats::{ConnectorStats, StatsSnapshot};
use crate::config::SnapshotMode;

/// Connector state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    #[default]
    Undef,
    Stopped,
    Initializing,
    Paused,
    Syncing,
    Parsing,
    Converting,
    Executing,
    OffsetUpdate,
    Restarting,
    SchemaSyncDone,
    ReloadRules,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::Undef => "undef",
            ConnectorState::Stopped => "stopped",
            ConnectorState::Initializing => "initializing",
            ConnectorState::Paused => "paused",
            ConnectorState::Syncing => "syncing",
            ConnectorState::Parsing => "parsing",
            ConnectorState::Converting => "converting",
            ConnectorState::Executing => "executing",
            ConnectorState::OffsetUpdate => "offset update",
            ConnectorState::Restarting => "restarting",
            ConnectorState::SchemaSyncDone => "schema sync done",
            ConnectorState::ReloadRules => "reload rules",
        }
    }
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse progress reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStage {
    #[default]
    Undef,
    InitialSnapshot,
    ChangeDataCapture,
    SchemaSync,
}

impl ConnectorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStage::Undef => "undef",
            ConnectorStage::InitialSnapshot => "initial snapshot",
            ConnectorStage::ChangeDataCapture => "change data capture",
            ConnectorStage::SchemaSync => "schema sync",
        }
    }
}

/// A control request posted by an external caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub state: ConnectorState,
    pub data: Option<String>,
}

/// Why a request could not be posted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request slot busy")]
    Busy,
    #[error("status slot held by pid {0}")]
    Held(u32),
    #[error("no such connector: {0}")]
    Unknown(String),
    #[error("connector must be paused for this request (state is {0})")]
    NotPaused(ConnectorState),
}

/// Copied-out view of one connector slot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub pid: u32,
    pub state: ConnectorState,
    pub stage: ConnectorStage,
    pub last_error: String,
    pub last_offset: String,
    pub snapshot_mode: SnapshotMode,
    pub source_database: String,
    pub destination_database: String,
    pub stats: StatsSnapshot,
}

#[derive(Debug)]
struct Slot {
    pid: u32,
    state: ConnectorState,
    stage: ConnectorStage,
    last_error: String,
    last_offset: String,
    snapshot_mode: SnapshotMode,
    source_database: String,
    destination_database: String,
    request: Option<Request>,
    stats: Arc<ConnectorStats>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            pid: 0,
            state: ConnectorState::Undef,
            stage: ConnectorStage::Undef,
            last_error: String::new(),
            last_offset: String::new(),
            snapshot_mode: SnapshotMode::default(),
            source_database: String::new(),
            destination_database: String::new(),
            request: None,
            stats: Arc::new(ConnectorStats::new()),
        }
    }
}

/// The process-wide status table.
///
/// All mutation happens under the write lock; snapshots copy out under the
/// read lock. The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    slots: RwLock<HashMap<String, Slot>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a starting supervisor. Fails when another live
    /// pid already holds it.
    pub fn claim(
        &self,
        name: &str,
        pid: u32,
        snapshot_mode: SnapshotMode,
        source_database: &str,
        destination_database: &str,
        stats: Arc<ConnectorStats>,
    ) -> Result<(), RequestError> {
        let mut slots = self.slots.write();
        let slot = slots.entry(name.to_string()).or_insert_with(Slot::empty);
        if slot.pid != 0 && slot.pid != pid {
            warn!(connector = name, holder = slot.pid, "status slot already claimed");
            return Err(RequestError::Held(slot.pid));
        }
        slot.pid = pid;
        slot.state = ConnectorState::Initializing;
        slot.stage = ConnectorStage::Undef;
        slot.last_error.clear();
        slot.snapshot_mode = snapshot_mode;
        slot.source_database = source_database.to_string();
        slot.destination_database = destination_database.to_string();
        slot.stats = stats;
        info!(connector = name, pid, "claimed status slot");
        Ok(())
    }

    /// Release a slot at supervisor exit; only the owning pid may release.
    pub fn release(&self, name: &str, pid: u32) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(name) {
            if slot.pid == pid {
                slot.pid = 0;
                slot.state = ConnectorState::Stopped;
                slot.request = None;
                info!(connector = name, pid, "released status slot");
            }
        }
    }

    /// Process-exit hook: clear every slot the pid still owns.
    pub fn release_all_for_pid(&self, pid: u32) {
        let mut slots = self.slots.write();
        for (name, slot) in slots.iter_mut() {
            if slot.pid == pid {
                slot.pid = 0;
                slot.state = ConnectorState::Stopped;
                slot.request = None;
                info!(connector = %name, pid, "cleared slot on process exit");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<StatusSnapshot> {
        let slots = self.slots.read();
        slots.get(name).map(|slot| StatusSnapshot {
            name: name.to_string(),
            pid: slot.pid,
            state: slot.state,
            stage: slot.stage,
            last_error: slot.last_error.clone(),
            last_offset: slot.last_offset.clone(),
            snapshot_mode: slot.snapshot_mode,
            source_database: slot.source_database.clone(),
            destination_database: slot.destination_database.clone(),
            stats: slot.stats.snapshot(),
        })
    }

    pub fn all(&self) -> Vec<StatusSnapshot> {
        let names: Vec<String> = self.slots.read().keys().cloned().collect();
        names.iter().filter_map(|n| self.get(n)).collect()
    }

    pub fn set_state(&self, name: &str, state: ConnectorState) {
        if let Some(slot) = self.slots.write().get_mut(name) {
            slot.state = state;
        }
    }

    pub fn state(&self, name: &str) -> ConnectorState {
        self.slots
            .read()
            .get(name)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn set_stage(&self, name: &str, stage: ConnectorStage) {
        if let Some(slot) = self.slots.write().get_mut(name) {
            slot.stage = stage;
        }
    }

    pub fn set_error(&self, name: &str, error: &str) {
        if let Some(slot) = self.slots.write().get_mut(name) {
            slot.last_error = error.to_string();
        }
    }

    pub fn clear_error(&self, name: &str) {
        if let Some(slot) = self.slots.write().get_mut(name) {
            slot.last_error.clear();
        }
    }

    pub fn set_offset(&self, name: &str, offset: &str) {
        if let Some(slot) = self.slots.write().get_mut(name) {
            slot.last_offset = offset.to_string();
        }
    }

    /// Post a control request. Rejected when the mailbox is occupied.
    pub fn post_request(&self, name: &str, request: Request) -> Result<(), RequestError> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| RequestError::Unknown(name.to_string()))?;
        if slot.request.is_some() {
            return Err(RequestError::Busy);
        }
        slot.request = Some(request);
        Ok(())
    }

    /// Drain the pending request, if any. Supervisor-only.
    pub fn take_request(&self, name: &str) -> Option<Request> {
        self.slots.write().get_mut(name)?.request.take()
    }

    // Admin verbs: thin wrappers with the documented preconditions.

    pub fn request_pause(&self, name: &str) -> Result<(), RequestError> {
        self.post_request(
            name,
            Request {
                state: ConnectorState::Paused,
                data: None,
            },
        )
    }

    pub fn request_resume(&self, name: &str) -> Result<(), RequestError> {
        self.post_request(
            name,
            Request {
                state: ConnectorState::Syncing,
                data: None,
            },
        )
    }

    /// Request an offset rewrite; only legal while paused.
    pub fn request_offset(&self, name: &str, offset: &str) -> Result<(), RequestError> {
        let state = self.state(name);
        if state != ConnectorState::Paused {
            return Err(RequestError::NotPaused(state));
        }
        self.post_request(
            name,
            Request {
                state: ConnectorState::OffsetUpdate,
                data: Some(offset.to_string()),
            },
        )
    }

    pub fn request_stop(&self, name: &str) -> Result<(), RequestError> {
        self.post_request(
            name,
            Request {
                state: ConnectorState::Stopped,
                data: None,
            },
        )
    }

    pub fn request_restart(&self, name: &str) -> Result<(), RequestError> {
        self.post_request(
            name,
            Request {
                state: ConnectorState::Restarting,
                data: None,
            },
        )
    }

    pub fn request_rule_reload(&self, name: &str) -> Result<(), RequestError> {
        self.post_request(
            name,
            Request {
                state: ConnectorState::ReloadRules,
                data: None,
            },
        )
    }
}
