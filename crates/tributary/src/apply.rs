//! Destination applier
//!
//! Executes one translated change against the destination, each call in its
//! own transaction. Row-location misses on update/delete are reported as
//! outcomes, not errors: replayed events after a restart are expected to
//! miss occasionally and must not stop the connector.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::common::{EngineError, Result};
use crate::ddl::TranslatedDdl;
use crate::destination::{Destination, Oid, TableHandle};
use crate::dml::{DmlPayload, RowOp, TranslatedDml, TupleField, TupleOp};

/// Longest destination error text kept in the shared status surface.
pub const ERROR_TEXT_CAP: usize = 256;

/// Result of applying one DML record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The before image matched no live row; counted as a bad event
    RowNotFound(&'static str),
}

/// Applies translated changes through the [`Destination`] seam.
pub struct Applier {
    dest: Arc<dyn Destination>,
}

impl Applier {
    pub fn new(dest: Arc<dyn Destination>) -> Self {
        Self { dest }
    }

    pub fn destination(&self) -> &Arc<dyn Destination> {
        &self.dest
    }

    /// Run every statement of a schema change in one transaction.
    pub async fn apply_ddl(&self, ddl: &TranslatedDdl) -> Result<()> {
        if ddl.statements.is_empty() {
            return Ok(());
        }
        self.dest.begin_txn().await?;
        for statement in &ddl.statements {
            debug!(%statement, "applying ddl");
            if let Err(e) = self.dest.execute_sql(statement).await {
                return self.fail(None, e).await;
            }
        }
        self.dest.commit_txn().await
    }

    /// Apply one row change in its own transaction.
    pub async fn apply_dml(&self, dml: &TranslatedDml) -> Result<ApplyOutcome> {
        match &dml.payload {
            DmlPayload::Sql(statement) => {
                self.dest.begin_txn().await?;
                debug!(%statement, "applying dml");
                if let Err(e) = self.dest.execute_sql(statement).await {
                    return self.fail(None, e).await.map(|_| ApplyOutcome::Applied);
                }
                self.dest.commit_txn().await?;
                Ok(ApplyOutcome::Applied)
            }
            DmlPayload::Tuple(tuple) => self.apply_tuple(dml.op, tuple).await,
        }
    }

    async fn apply_tuple(&self, op: RowOp, tuple: &TupleOp) -> Result<ApplyOutcome> {
        self.dest.begin_txn().await?;
        let handle = match self.dest.open_table(tuple.table_oid).await {
            Ok(h) => h,
            Err(e) => return self.fail(Some(tuple.table_oid), e).await.map(|_| ApplyOutcome::Applied),
        };

        let outcome = self.run_tuple_op(op, tuple, &handle).await;
        match outcome {
            Ok(outcome) => {
                self.dest.close_table(handle).await?;
                self.dest.commit_txn().await?;
                if let ApplyOutcome::RowNotFound(what) = outcome {
                    warn!(oid = tuple.table_oid, "{what}");
                }
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.dest.close_table(handle).await;
                self.fail(Some(tuple.table_oid), e)
                    .await
                    .map(|_| ApplyOutcome::Applied)
            }
        }
    }

    async fn run_tuple_op(
        &self,
        op: RowOp,
        tuple: &TupleOp,
        handle: &TableHandle,
    ) -> Result<ApplyOutcome> {
        let before = match &tuple.before {
            Some(fields) => Some(self.resolve_row(fields).await?),
            None => None,
        };
        let after = match &tuple.after {
            Some(fields) => Some(self.resolve_row(fields).await?),
            None => None,
        };
        let has_key = !handle.pk_positions.is_empty();

        match op {
            RowOp::Read | RowOp::Insert => {
                let row = after.ok_or_else(|| EngineError::apply("insert without after image"))?;
                self.dest.insert_tuple(handle, &row).await?;
                Ok(ApplyOutcome::Applied)
            }
            RowOp::Update => {
                let before =
                    before.ok_or_else(|| EngineError::apply("update without before image"))?;
                let after =
                    after.ok_or_else(|| EngineError::apply("update without after image"))?;
                let found = if has_key {
                    self.dest
                        .update_tuple_by_index(handle, &before, &after)
                        .await?
                } else {
                    self.dest
                        .update_tuple_by_seq_scan(handle, &before, &after)
                        .await?
                };
                if found {
                    Ok(ApplyOutcome::Applied)
                } else {
                    Ok(ApplyOutcome::RowNotFound("tuple to update not found"))
                }
            }
            RowOp::Delete => {
                let before =
                    before.ok_or_else(|| EngineError::apply("delete without before image"))?;
                let found = if has_key {
                    self.dest.delete_tuple_by_index(handle, &before).await?
                } else {
                    self.dest.delete_tuple_by_seq_scan(handle, &before).await?
                };
                if found {
                    Ok(ApplyOutcome::Applied)
                } else {
                    Ok(ApplyOutcome::RowNotFound("tuple to delete not found"))
                }
            }
        }
    }

    /// Materialize tuple fields; expressions go through the destination's
    /// scalar evaluator.
    async fn resolve_row(&self, fields: &[TupleField]) -> Result<Vec<Option<String>>> {
        let mut row = Vec::with_capacity(fields.len());
        for field in fields {
            row.push(match field {
                TupleField::Null => None,
                TupleField::Text(text) => Some(text.clone()),
                TupleField::Expression(expr) => Some(self.dest.eval_scalar(expr).await?),
            });
        }
        Ok(row)
    }

    /// Abort the transaction and surface a capped, oid-prefixed error.
    async fn fail(&self, oid: Option<Oid>, err: EngineError) -> Result<()> {
        let _ = self.dest.abort_txn().await;
        let message = match err {
            EngineError::Apply(m) => m,
            other => other.to_string(),
        };
        Err(EngineError::apply(capped_error_text(oid, &message)))
    }
}

/// Truncate destination error text for the shared status field, prefixed
/// with the table oid when one is known.
pub fn capped_error_text(oid: Option<Oid>, message: &str) -> String {
    let mut text = match oid {
        Some(oid) => format!("oid {oid}: {message}"),
        None => message.to_string(),
    };
    if text.len() > ERROR_TEXT_CAP {
        let mut cut = ERROR_TEXT_CAP;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
