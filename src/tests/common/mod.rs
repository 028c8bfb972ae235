// Common test utilities and helpers
//
// End-to-end scenarios run fully in-process: a file-backed DuckDB source
// is seeded with the fixture tables and an in-memory DuckDB metric store
// records results. Each test gets its own database file; the seeding
// connection is dropped before the engine opens the file.

use crate::config::Config;
use crate::models::{CheckType, Condition, ConnectionConfig, MetricRecord};
use crate::store::duckdb::DuckDbMetricStore;
use crate::store::MetricStore;
use chrono::NaiveDateTime;
use duckdb::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique database file path for one test.
pub fn temp_db_path(tag: &str) -> PathBuf {
    let n = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "weiser-test-{}-{}-{}.duckdb",
        tag,
        std::process::id(),
        n
    ))
}

/// Seed the fixture tables:
/// - `orders`: 4 rows, budgeted_amount summing to 1006.00
/// - `orders_q2`: 3 rows, budgeted_amount summing to 2500.00
/// - `vendors`: 3 rows, tenant_id values 1, 1, 2
/// - `customers`: 5 rows, email NULL in 3 of them, phone never NULL
pub fn seed_source(path: &std::path::Path) {
    let conn = Connection::open(path).expect("failed to open seed database");
    conn.execute_batch(
        r#"
CREATE TABLE orders (id INTEGER, budgeted_amount DOUBLE, created_at TIMESTAMP);
INSERT INTO orders VALUES
    (1, 100.50, '2025-05-30 10:00:00'),
    (2, 250.25, '2025-05-31 11:00:00'),
    (3, 400.00, '2025-06-01 12:00:00'),
    (4, 255.25, '2025-06-01 13:00:00');

CREATE TABLE orders_q2 (id INTEGER, budgeted_amount DOUBLE);
INSERT INTO orders_q2 VALUES (1, 1000.00), (2, 1000.00), (3, 500.00);

CREATE TABLE vendors (id INTEGER, tenant_id INTEGER);
INSERT INTO vendors VALUES (1, 1), (2, 1), (3, 2);

CREATE TABLE customers (id INTEGER, email VARCHAR, phone VARCHAR);
INSERT INTO customers VALUES
    (1, NULL, '555-0100'),
    (2, 'a@example.com', '555-0101'),
    (3, NULL, '555-0102'),
    (4, 'b@example.com', '555-0103'),
    (5, NULL, '555-0104');
"#,
    )
    .expect("failed to seed source database");
    // Connection drops here so the engine can take the file lock.
}

/// In-memory metric store, initialized to head schema.
pub async fn memory_store() -> Arc<DuckDbMetricStore> {
    let config: ConnectionConfig =
        serde_yaml::from_str("type: metricstore\ndb_type: duckdb").expect("store config");
    let store = Arc::new(DuckDbMetricStore::open(&config, true).expect("open store"));
    store.initialize().await.expect("initialize store");
    store
}

/// Configuration with one DuckDB datasource over `db_path` and the given
/// checks block (YAML list items, two-space indented).
pub fn config_with_checks(db_path: &std::path::Path, checks_yaml: &str) -> Config {
    let yaml = format!(
        r#"
version: 1
datasources:
  - name: default
    type: duckdb
    path: "{}"
connections:
  - type: metricstore
    db_type: duckdb
checks:
{}
"#,
        db_path.display(),
        checks_yaml
    );
    let config = Config::parse(&yaml).expect("valid test config");
    config.validate().expect("test config validates");
    config
}

/// Synthetic historical record for anomaly scenarios.
pub fn history_record(
    check_id: &str,
    value: f64,
    run_time: NaiveDateTime,
) -> MetricRecord {
    MetricRecord {
        id: None,
        run_id: "seed-run".into(),
        check_id: check_id.into(),
        name: "seeded_history".into(),
        datasource: "default".into(),
        dataset: "orders".into(),
        check_type: CheckType::RowCount,
        condition: Condition::Gt,
        threshold: Some(0.0),
        threshold_list: vec![],
        actual_value: Some(value),
        success: true,
        fail: false,
        run_time,
        dimensions: vec![],
        time_bucket: None,
    }
}

/// Seed `n` history points with the given values, one second apart.
pub async fn seed_history(store: &Arc<DuckDbMetricStore>, check_id: &str, values: &[f64]) {
    let base = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(values.len() as i64);
    for (i, value) in values.iter().enumerate() {
        let record =
            history_record(check_id, *value, base + chrono::Duration::seconds(i as i64));
        store.write(&record).await.expect("seed history write");
    }
}

pub fn cleanup_db(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
}
