//! End-to-end engine tests: scripted producer in, memory destination out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tributary::config::{ConnectorConfig, EmitMode, SnapshotMode, SourceFlavor};
use tributary::destination::{typeoid, DataCache};
use tributary::status::ConnectorState;
use tributary::testing::{MemoryDestination, ScriptedProducer};
use tributary::{Result, StatusRegistry, Supervisor};

fn config(name: &str, emit: EmitMode, dir: &std::path::Path) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        flavor: SourceFlavor::MySql,
        host: "127.0.0.1".into(),
        port: 3306,
        user: "repl".into(),
        credential: "secret".into(),
        source_database: "inv".into(),
        destination_database: "warehouse".into(),
        table_include_list: vec![],
        snapshot_mode: SnapshotMode::Initial,
        emit_mode: emit,
        rules_file: None,
        metadata_dir: dir.to_path_buf(),
        nap_ms: 10,
    }
}

struct Harness {
    registry: Arc<StatusRegistry>,
    producer: ScriptedProducer,
    dest: Arc<MemoryDestination>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
    name: String,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn start(name: &str, emit: EmitMode, batches: Vec<Vec<String>>, dest: Arc<MemoryDestination>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(StatusRegistry::new());
        let producer = ScriptedProducer::new(batches);
        let supervisor = Supervisor::new(
            config(name, emit, dir.path()),
            Box::new(producer.clone()),
            dest.clone(),
            registry.clone(),
        )
        .expect("supervisor");
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(rx));
        Self {
            registry,
            producer,
            dest,
            shutdown,
            task,
            name: name.to_string(),
            _dir: dir,
        }
    }

    async fn wait_for(&self, what: &str, condition: impl Fn(&Self) -> bool) {
        for _ in 0..500 {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn state(&self) -> ConnectorState {
        self.registry.state(&self.name)
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.expect("join")
    }
}

fn create_orders_event() -> String {
    serde_json::json!({"payload": {
        "source": {"connector": "mysql", "db": "inv", "table": "orders", "snapshot": "true"},
        "ddl": "CREATE TABLE orders (...)",
        "tableChanges": [{
            "id": "inv.orders",
            "type": "CREATE",
            "table": {
                "primaryKeyColumnNames": ["order_number"],
                "columns": [
                    {"name": "order_number", "typeName": "INT", "optional": false,
                     "autoIncremented": true, "position": 1},
                    {"name": "quantity", "typeName": "INT", "optional": false, "position": 2},
                    {"name": "product", "typeName": "VARCHAR", "length": 64,
                     "optional": true, "position": 3}
                ]
            }
        }]
    }})
    .to_string()
}

fn insert_orders_event() -> String {
    serde_json::json!({"payload": {
        "op": "c",
        "ts_ms": 1700000001000i64,
        "source": {"connector": "mysql", "db": "inv", "table": "orders",
                   "snapshot": "false", "ts_ms": 1700000000000i64},
        "after": {"order_number": 10001, "quantity": 2, "product": "widget"}
    }})
    .to_string()
}

fn seed_orders(dest: &MemoryDestination) -> tributary::Oid {
    dest.create_table(
        "inv",
        "orders",
        &[
            ("order_number", typeoid::INT4, -1),
            ("quantity", typeoid::INT4, -1),
            ("product", typeoid::VARCHAR, 64),
        ],
        &["order_number"],
    )
}

#[tokio::test]
async fn create_event_emits_schema_and_table() {
    let dest = MemoryDestination::new();
    let h = Harness::start(
        "create1",
        EmitMode::Sql,
        vec![vec![create_orders_event()]],
        dest,
    );
    h.wait_for("create ddl applied", |h| h.dest.executed_sql().len() == 2)
        .await;

    assert_eq!(
        h.dest.executed_sql(),
        vec![
            "CREATE SCHEMA IF NOT EXISTS inv;".to_string(),
            "CREATE TABLE IF NOT EXISTS inv.orders ( order_number SERIAL NOT NULL , \
             quantity INT NOT NULL , product VARCHAR(64) , PRIMARY KEY(order_number));"
                .to_string(),
        ]
    );
    let snap = h.registry.get("create1").expect("snapshot");
    assert_eq!(snap.stats.ddl_ops, 1);
    assert_eq!(snap.stats.bad_events, 0);
    assert_eq!(snap.last_offset, "pos-1");
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn insert_event_in_sql_mode() {
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let h = Harness::start(
        "insert1",
        EmitMode::Sql,
        vec![vec![insert_orders_event()]],
        dest,
    );
    h.wait_for("insert applied", |h| !h.dest.executed_sql().is_empty())
        .await;

    assert_eq!(
        h.dest.executed_sql(),
        vec!["INSERT INTO inv.orders(order_number,quantity,product) VALUES (10001,2,'widget');"]
    );
    let snap = h.registry.get("insert1").expect("snapshot");
    assert_eq!(snap.stats.inserts, 1);
    assert_eq!(snap.stats.dml_ops, 1);
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn insert_event_in_tuple_mode() {
    let dest = MemoryDestination::new();
    let oid = seed_orders(&dest);
    let h = Harness::start(
        "insert2",
        EmitMode::Tuple,
        vec![vec![insert_orders_event()]],
        dest,
    );
    h.wait_for("row landed", |h| !h.dest.rows(oid).is_empty()).await;

    assert_eq!(
        h.dest.rows(oid),
        vec![vec![
            Some("10001".to_string()),
            Some("2".to_string()),
            Some("widget".to_string()),
        ]]
    );
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn decoded_literals_reach_sql_statements() {
    // numeric AX0= (381, scale 2) and a millisecond timestamp decode inside
    // one insert
    let event = serde_json::json!({
        "schema": {"fields": [
            {"field": "before", "fields": []},
            {"field": "after", "fields": [
                {"field": "price", "name": "org.apache.kafka.connect.data.Decimal",
                 "parameters": {"scale": "2"}},
                {"field": "updated", "name": "io.debezium.time.Timestamp"}
            ]}
        ]},
        "payload": {
            "op": "c",
            "source": {"db": "inv", "table": "ledger", "snapshot": "false"},
            "after": {"price": "AX0=", "updated": 1707000000000i64}
        }
    })
    .to_string();

    let dest = MemoryDestination::new();
    dest.create_table(
        "inv",
        "ledger",
        &[("price", typeoid::NUMERIC, -1), ("updated", typeoid::TIMESTAMP, 3)],
        &[],
    );
    let h = Harness::start("decode1", EmitMode::Sql, vec![vec![event]], dest);
    h.wait_for("insert applied", |h| !h.dest.executed_sql().is_empty())
        .await;

    assert_eq!(
        h.dest.executed_sql(),
        vec!["INSERT INTO inv.ledger(price,updated) VALUES (3.81,'2024-02-03T22:40:00.000000');"]
    );
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn update_miss_is_nonfatal() {
    let event = serde_json::json!({"payload": {
        "op": "u",
        "source": {"db": "inv", "table": "orders", "snapshot": "false"},
        "before": {"order_number": 99999, "quantity": 1, "product": "ghost"},
        "after": {"order_number": 99999, "quantity": 2, "product": "ghost"}
    }})
    .to_string();

    let dest = MemoryDestination::new();
    let oid = seed_orders(&dest);
    dest.seed_row(
        oid,
        vec![Some("1".into()), Some("5".into()), Some("gadget".into())],
    );

    let h = Harness::start("miss1", EmitMode::Tuple, vec![vec![event]], dest);
    h.wait_for("miss recorded", |h| {
        h.registry
            .get("miss1")
            .map(|s| s.stats.bad_events == 1)
            .unwrap_or(false)
    })
    .await;
    h.wait_for("back to syncing", |h| h.state() == ConnectorState::Syncing)
        .await;

    let snap = h.registry.get("miss1").expect("snapshot");
    assert_eq!(snap.last_error, "tuple to update not found");
    // the existing row is untouched
    assert_eq!(
        h.dest.rows(oid),
        vec![vec![Some("1".to_string()), Some("5".to_string()), Some("gadget".to_string())]]
    );
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn pause_then_offset_update() {
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let h = Harness::start("pause1", EmitMode::Sql, vec![], dest);
    h.wait_for("syncing", |h| h.state() == ConnectorState::Syncing)
        .await;

    h.registry.request_pause("pause1").expect("pause");
    h.wait_for("paused", |h| h.state() == ConnectorState::Paused)
        .await;

    // queued work must not be consumed while paused
    h.producer.push_batch(vec![insert_orders_event()]);

    h.registry.request_offset("pause1", "X").expect("offset request");
    h.wait_for("offset persisted", |h| {
        h.registry
            .get("pause1")
            .map(|s| s.last_offset == "X")
            .unwrap_or(false)
    })
    .await;
    assert_eq!(h.state(), ConnectorState::Paused);
    assert_eq!(h.producer.offsets_written().last().map(String::as_str), Some("X"));
    assert_eq!(h.producer.remaining_batches(), 1);
    assert!(h.dest.executed_sql().is_empty());

    // resume drains the queued batch
    h.registry.request_resume("pause1").expect("resume");
    h.wait_for("drained after resume", |h| h.producer.remaining_batches() == 0)
        .await;
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn offset_update_rejected_while_syncing() {
    let dest = MemoryDestination::new();
    let h = Harness::start("reject1", EmitMode::Sql, vec![], dest);
    h.wait_for("syncing", |h| h.state() == ConnectorState::Syncing)
        .await;
    assert!(h.registry.request_offset("reject1", "X").is_err());
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn bad_event_is_skipped_and_counted() {
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let h = Harness::start(
        "skip1",
        EmitMode::Sql,
        vec![vec!["{not json".to_string(), insert_orders_event()]],
        dest,
    );
    h.wait_for("good event applied", |h| !h.dest.executed_sql().is_empty())
        .await;

    let snap = h.registry.get("skip1").expect("snapshot");
    assert_eq!(snap.stats.bad_events, 1);
    assert!(!snap.last_error.is_empty());
    assert_eq!(snap.state, ConnectorState::Syncing);
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn apply_failure_is_captured_and_skipped() {
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    dest.fail_next_sql("duplicate key value violates unique constraint");
    let h = Harness::start(
        "fail1",
        EmitMode::Sql,
        vec![vec![insert_orders_event()]],
        dest,
    );
    h.wait_for("failure recorded", |h| {
        h.registry
            .get("fail1")
            .map(|s| s.stats.bad_events == 1)
            .unwrap_or(false)
    })
    .await;

    let snap = h.registry.get("fail1").expect("snapshot");
    assert!(snap.last_error.contains("duplicate key"));
    assert_eq!(h.dest.aborts(), 1);
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn drop_event_invalidates_cached_layout() {
    let drop_event = serde_json::json!({"payload": {
        "source": {"db": "inv", "table": "orders", "snapshot": "false"},
        "ddl": "DROP TABLE orders",
        "tableChanges": [{"id": "inv.orders", "type": "DROP", "table": {}}]
    }})
    .to_string();

    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let h = Harness::start(
        "drop1",
        EmitMode::Sql,
        vec![vec![insert_orders_event(), drop_event]],
        dest,
    );
    h.wait_for("both applied", |h| h.dest.executed_sql().len() == 2)
        .await;

    let sql = h.dest.executed_sql();
    assert!(sql[0].starts_with("INSERT INTO inv.orders"));
    assert_eq!(sql[1], "DROP TABLE IF EXISTS inv.orders;");
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn include_list_filters_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config("filter1", EmitMode::Sql, dir.path());
    cfg.table_include_list = vec!["inv.allowed".to_string()];

    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let registry = Arc::new(StatusRegistry::new());
    let producer = ScriptedProducer::new(vec![vec![insert_orders_event()]]);
    let supervisor = Supervisor::new(
        cfg,
        Box::new(producer.clone()),
        dest.clone(),
        registry.clone(),
    )
    .expect("supervisor");
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(rx));

    for _ in 0..50 {
        if producer.remaining_batches() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(dest.executed_sql().is_empty());

    let _ = shutdown.send(());
    task.await.expect("join").expect("clean stop");
}

#[tokio::test]
async fn duplicate_connector_name_refuses_to_start() {
    let dest = MemoryDestination::new();
    let h = Harness::start("dup1", EmitMode::Sql, vec![], dest.clone());
    h.wait_for("first running", |h| h.state() == ConnectorState::Syncing)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let second = Supervisor::new(
        config("dup1", EmitMode::Sql, dir.path()),
        Box::new(ScriptedProducer::new(vec![])),
        dest,
        h.registry.clone(),
    )
    .expect("supervisor");
    // same pid reclaims the slot in-process, so simulate a foreign holder
    // by checking the registry-level claim directly
    let claim = h.registry.claim(
        "dup1",
        999_999,
        SnapshotMode::Initial,
        "inv",
        "warehouse",
        second.stats(),
    );
    assert!(claim.is_err());
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn transform_expression_reaches_evaluator() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rules_path = dir.path().join("rules.json");
    std::fs::write(
        &rules_path,
        serde_json::json!({
            "transform_expression_rules": [
                {"transform_from": "inv.orders.product", "transform_expression": "upper(%d)"}
            ]
        })
        .to_string(),
    )
    .expect("write rules");

    let mut cfg = config("xform1", EmitMode::Tuple, dir.path());
    cfg.rules_file = Some(rules_path);

    let dest = MemoryDestination::new();
    let oid = seed_orders(&dest);
    let registry = Arc::new(StatusRegistry::new());
    let producer = ScriptedProducer::new(vec![vec![insert_orders_event()]]);
    let supervisor = Supervisor::new(
        cfg,
        Box::new(producer),
        dest.clone(),
        registry.clone(),
    )
    .expect("supervisor");
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(rx));

    for _ in 0..500 {
        if !dest.rows(oid).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // the memory evaluator echoes expressions, so the substituted text both
    // reaches the evaluator and lands in the row
    assert_eq!(dest.evaluated_expressions(), vec!["upper(widget)"]);
    assert_eq!(
        dest.rows(oid),
        vec![vec![
            Some("10001".to_string()),
            Some("2".to_string()),
            Some("upper(widget)".to_string()),
        ]]
    );
    let _ = shutdown.send(());
    task.await.expect("join").expect("clean stop");
}

#[tokio::test]
async fn restart_request_bounces_producer() {
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let h = Harness::start("restart2", EmitMode::Sql, vec![], dest);
    h.wait_for("syncing", |h| h.state() == ConnectorState::Syncing)
        .await;

    h.registry.request_restart("restart2").expect("restart");
    h.wait_for("restarted", |h| {
        h.producer.start_count() == 2 && h.state() == ConnectorState::Syncing
    })
    .await;
    assert!(!h.producer.stopped());
    h.stop().await.expect("clean stop");
}

#[tokio::test]
async fn data_cache_invalidation() {
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let mut cache = DataCache::new();

    let entry = cache.lookup(dest.as_ref(), "inv", "orders").await.expect("lookup");
    assert_eq!(entry.descriptor.active_len(), 3);
    assert!(cache.contains("inv", "orders"));
    assert!(cache.contains("INV", "ORDERS"));

    cache.invalidate("Inv", "Orders");
    assert!(!cache.contains("inv", "orders"));

    let missing = cache.lookup(dest.as_ref(), "inv", "nope").await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn offset_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dest = MemoryDestination::new();
    seed_orders(&dest);
    let registry = Arc::new(StatusRegistry::new());

    // first run applies one event and persists its offset
    let producer = ScriptedProducer::new(vec![vec![insert_orders_event()]]);
    let supervisor = Supervisor::new(
        config("restart1", EmitMode::Sql, dir.path()),
        Box::new(producer.clone()),
        dest.clone(),
        registry.clone(),
    )
    .expect("supervisor");
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(rx));
    for _ in 0..500 {
        if !dest.executed_sql().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let _ = shutdown.send(());
    task.await.expect("join").expect("clean stop");

    // second run hands the stored offset back to the producer
    let producer2 = ScriptedProducer::new(vec![]);
    let supervisor = Supervisor::new(
        config("restart1", EmitMode::Sql, dir.path()),
        Box::new(producer2.clone()),
        dest,
        registry.clone(),
    )
    .expect("supervisor");
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(rx));
    for _ in 0..500 {
        if producer2.offsets_written().first().map(String::as_str) == Some("pos-1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(producer2.offsets_written(), vec!["pos-1"]);
    let _ = shutdown.send(());
    task.await.expect("join").expect("clean stop");
}
