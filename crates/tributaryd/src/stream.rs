//! SQL stream destination: a preview sink for translated changes.
//!
//! Serves the catalog from table layouts declared in the daemon config and
//! writes every transaction to a file or stdout as SQL text. Tuple-mode
//! operations are rendered to equivalent statements so both emission modes
//! can be previewed. The catalog is static: tables created mid-replay are
//! written out but not served back.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tracing::warn;

use tributary::common::{EngineError, Result};
use tributary::decode::quote_literal;
use tributary::destination::{typeoid, ColumnMeta, Destination, Oid, TableHandle, TupleDescriptor};

use crate::config::TableDecl;

/// Map a declared type name to a destination type oid.
fn type_oid_of(name: &str) -> Oid {
    match name.to_ascii_lowercase().as_str() {
        "smallint" | "int2" => typeoid::INT2,
        "int" | "integer" | "int4" | "serial" => typeoid::INT4,
        "bigint" | "int8" | "bigserial" => typeoid::INT8,
        "real" | "float4" => typeoid::FLOAT4,
        "double precision" | "float8" => typeoid::FLOAT8,
        "numeric" | "decimal" => typeoid::NUMERIC,
        "money" => typeoid::MONEY,
        "boolean" | "bool" => typeoid::BOOL,
        "char" | "bpchar" => typeoid::BPCHAR,
        "varchar" | "character varying" => typeoid::VARCHAR,
        "text" => typeoid::TEXT,
        "bytea" => typeoid::BYTEA,
        "date" => typeoid::DATE,
        "time" => typeoid::TIME,
        "timestamp" => typeoid::TIMESTAMP,
        "timestamptz" => typeoid::TIMESTAMPTZ,
        "bit" => typeoid::BIT,
        "varbit" | "bit varying" => typeoid::VARBIT,
        "uuid" => typeoid::UUID,
        "json" => typeoid::JSON,
        "jsonb" => typeoid::JSONB,
        "xml" => typeoid::XML,
        other => {
            warn!(type_name = other, "unknown declared type; treating as text");
            typeoid::TEXT
        }
    }
}

struct CatalogTable {
    qualified: String,
    descriptor: TupleDescriptor,
    pk_positions: Vec<usize>,
}

struct StreamState {
    writer: Box<dyn Write + Send>,
    next_oid: Oid,
    namespaces: HashMap<String, Oid>,
    table_names: HashMap<(Oid, String), Oid>,
    tables: HashMap<Oid, CatalogTable>,
}

/// [`Destination`] that renders everything as SQL text.
pub struct SqlStreamDestination {
    state: Mutex<StreamState>,
}

impl SqlStreamDestination {
    pub fn new(tables: &[TableDecl], output: Option<&Path>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match output {
            Some(path) => Box::new(std::fs::File::create(path).map_err(|e| {
                EngineError::config(format!("cannot create {}: {e}", path.display()))
            })?),
            None => Box::new(std::io::stdout()),
        };

        let mut state = StreamState {
            writer,
            next_oid: 16_384,
            namespaces: HashMap::new(),
            table_names: HashMap::new(),
            tables: HashMap::new(),
        };
        for decl in tables {
            register(&mut state, decl);
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut state = self.state.lock();
        writeln!(state.writer, "{line}")?;
        state.writer.flush()?;
        Ok(())
    }
}

fn register(state: &mut StreamState, decl: &TableDecl) {
    let schema_key = decl.schema.to_ascii_lowercase();
    let ns = match state.namespaces.get(&schema_key) {
        Some(oid) => *oid,
        None => {
            let oid = state.next_oid;
            state.next_oid += 1;
            state.namespaces.insert(schema_key.clone(), oid);
            oid
        }
    };

    let descriptor = TupleDescriptor {
        columns: decl
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| ColumnMeta {
                name: col.name.clone(),
                type_oid: type_oid_of(&col.type_name),
                position: i as i32 + 1,
                typemod: col.length,
                dropped: false,
            })
            .collect(),
    };
    let pk_positions = decl
        .primary_key
        .iter()
        .filter_map(|key| decl.columns.iter().position(|c| c.name.eq_ignore_ascii_case(key)))
        .collect();

    let oid = state.next_oid;
    state.next_oid += 1;
    state
        .table_names
        .insert((ns, decl.table.to_ascii_lowercase()), oid);
    state.tables.insert(
        oid,
        CatalogTable {
            qualified: format!("{}.{}", decl.schema, decl.table),
            descriptor,
            pk_positions,
        },
    );
}

/// Render one field for preview output.
fn render_field(field: &Option<String>) -> String {
    match field {
        None => "NULL".to_string(),
        Some(text) => quote_literal(text),
    }
}

fn predicate(handle: &TableHandle, before: &[Option<String>]) -> String {
    let active: Vec<&ColumnMeta> = handle.descriptor.active().collect();
    let slots: Vec<usize> = if handle.pk_positions.is_empty() {
        (0..before.len()).collect()
    } else {
        handle.pk_positions.clone()
    };
    slots
        .iter()
        .filter_map(|&slot| {
            let name = &active.get(slot)?.name;
            Some(match before.get(slot) {
                Some(None) | None => format!("{name} IS NULL"),
                Some(Some(value)) => format!("{name} = {}", quote_literal(value)),
            })
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[async_trait]
impl Destination for SqlStreamDestination {
    async fn begin_txn(&self) -> Result<()> {
        self.write_line("BEGIN;")
    }

    async fn commit_txn(&self) -> Result<()> {
        self.write_line("COMMIT;")
    }

    async fn abort_txn(&self) -> Result<()> {
        self.write_line("ROLLBACK;")
    }

    async fn execute_sql(&self, sql: &str) -> Result<()> {
        self.write_line(sql)
    }

    async fn eval_scalar(&self, expr: &str) -> Result<String> {
        // preview mode has no evaluator; the expression text flows through
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
        let qualified = self.qualified_of(handle.oid)?;
        let values: Vec<String> = row.iter().map(render_field).collect();
        self.write_line(&format!(
            "INSERT INTO {qualified} VALUES ({});",
            values.join(",")
        ))
    }

    async fn update_tuple_by_index(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<bool> {
        self.render_update(handle, before, after)?;
        Ok(true)
    }

    async fn update_tuple_by_seq_scan(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<bool> {
        self.render_update(handle, before, after)?;
        Ok(true)
    }

    async fn delete_tuple_by_index(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
    ) -> Result<bool> {
        let qualified = self.qualified_of(handle.oid)?;
        let clause = predicate(handle, before);
        self.write_line(&format!("DELETE FROM {qualified} WHERE {clause};"))?;
        Ok(true)
    }

    async fn delete_tuple_by_seq_scan(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
    ) -> Result<bool> {
        self.delete_tuple_by_index(handle, before).await
    }
}

impl SqlStreamDestination {
    fn qualified_of(&self, oid: Oid) -> Result<String> {
        self.state
            .lock()
            .tables
            .get(&oid)
            .map(|t| t.qualified.clone())
            .ok_or_else(|| EngineError::catalog(format!("no table with oid {oid}")))
    }

    fn render_update(
        &self,
        handle: &TableHandle,
        before: &[Option<String>],
        after: &[Option<String>],
    ) -> Result<()> {
        let qualified = self.qualified_of(handle.oid)?;
        let active: Vec<&ColumnMeta> = handle.descriptor.active().collect();
        let sets: Vec<String> = after
            .iter()
            .enumerate()
            .filter_map(|(slot, field)| {
                let name = &active.get(slot)?.name;
                Some(format!("{name} = {}", render_field(field)))
            })
            .collect();
        let clause = predicate(handle, before);
        self.write_line(&format!(
            "UPDATE {qualified} SET {} WHERE {clause};",
            sets.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnDecl;

    fn decl() -> TableDecl {
        TableDecl {
            schema: "inv".into(),
            table: "orders".into(),
            primary_key: vec!["order_number".into()],
            columns: vec![
                ColumnDecl {
                    name: "order_number".into(),
                    type_name: "int".into(),
                    length: -1,
                },
                ColumnDecl {
                    name: "product".into(),
                    type_name: "varchar".into(),
                    length: 64,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_catalog_from_declarations() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("plan.sql");
        let dest = SqlStreamDestination::new(&[decl()], Some(&out)).unwrap();

        let ns = dest.get_namespace_oid("inv").await.unwrap().unwrap();
        let oid = dest.get_table_oid(ns, "orders").await.unwrap().unwrap();
        let handle = dest.open_table(oid).await.unwrap();
        assert_eq!(handle.descriptor.active_len(), 2);
        assert_eq!(handle.pk_positions, vec![0]);
        assert_eq!(
            handle.descriptor.columns[1].type_oid,
            typeoid::VARCHAR
        );
    }

    #[tokio::test]
    async fn test_tuple_ops_render_sql() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("plan.sql");
        let dest = SqlStreamDestination::new(&[decl()], Some(&out)).unwrap();
        let ns = dest.get_namespace_oid("inv").await.unwrap().unwrap();
        let oid = dest.get_table_oid(ns, "orders").await.unwrap().unwrap();
        let handle = dest.open_table(oid).await.unwrap();

        dest.begin_txn().await.unwrap();
        dest.insert_tuple(
            &handle,
            &[Some("1".to_string()), Some("widget".to_string())],
        )
        .await
        .unwrap();
        dest.delete_tuple_by_index(&handle, &[Some("1".to_string()), None])
            .await
            .unwrap();
        dest.commit_txn().await.unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "BEGIN;",
                "INSERT INTO inv.orders VALUES ('1','widget');",
                "DELETE FROM inv.orders WHERE order_number = '1';",
                "COMMIT;",
            ]
        );
    }
}
