// Embedded DuckDB metric store.
//
// File-backed (or in-memory) analytic store with a custom migration
// ledger: applied versions live in `migrations(version, description,
// applied_at)`, the same columns a standard migration tool keeps, and any
// unapplied script runs in version order inside a transaction. When S3
// mirror fields are configured the metrics table is copied to object
// storage on shutdown through DuckDB's own httpfs extension.

use crate::models::{ConnectionConfig, MetricRecord};
use crate::store::MetricStore;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use duckdb::{params, Connection};
use std::sync::{Arc, Mutex};

const STORE_TARGET: &str = "metricstore";

/// Versioned migration scripts, applied ascending.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "create metrics table",
        r#"
CREATE SEQUENCE IF NOT EXISTS metrics_id_seq;
CREATE TABLE IF NOT EXISTS metrics (
    id             BIGINT PRIMARY KEY DEFAULT nextval('metrics_id_seq'),
    actual_value   DOUBLE,
    check_id       VARCHAR NOT NULL,
    run_id         VARCHAR NOT NULL,
    name           VARCHAR NOT NULL,
    datasource     VARCHAR NOT NULL,
    dataset        VARCHAR NOT NULL,
    type           VARCHAR NOT NULL,
    condition      VARCHAR NOT NULL,
    threshold      DOUBLE,
    threshold_list VARCHAR,
    success        BOOLEAN NOT NULL,
    fail           BOOLEAN NOT NULL,
    run_time       TIMESTAMP NOT NULL,
    dimensions     VARCHAR,
    time_bucket    TIMESTAMP
);
"#,
    ),
    (
        2,
        "index metrics by check and run time",
        "CREATE INDEX IF NOT EXISTS idx_metrics_check_run_time ON metrics (check_id, run_time);",
    ),
];

/// Operator-invoked downgrade scripts, applied descending.
const DOWNGRADES: &[(i64, &str)] = &[
    (2, "DROP INDEX IF EXISTS idx_metrics_check_run_time;"),
    (1, "DROP TABLE IF EXISTS metrics; DROP SEQUENCE IF EXISTS metrics_id_seq;"),
];

struct MirrorTarget {
    access_key: Option<String>,
    secret_access_key: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
    bucket: String,
    url_style: Option<String>,
}

pub struct DuckDbMetricStore {
    conn: Arc<Mutex<Connection>>,
    mirror: Option<MirrorTarget>,
}

impl DuckDbMetricStore {
    pub fn open(config: &ConnectionConfig, mirror_enabled: bool) -> WeiserResult<Self> {
        let conn = match config.path.as_deref() {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| {
            tracing::error!("failed to open metric store: {}", e);
            WeiserError::connection(STORE_TARGET, e.to_string())
        })?;

        let mirror = if mirror_enabled {
            config.s3_bucket.clone().map(|bucket| MirrorTarget {
                access_key: config.s3_access_key.clone(),
                secret_access_key: config.s3_secret_access_key.clone(),
                endpoint: config.s3_endpoint.clone(),
                region: config.s3_region.clone(),
                bucket,
                url_style: config.s3_url_style.clone(),
            })
        } else {
            None
        };

        Ok(Self { conn: Arc::new(Mutex::new(conn)), mirror })
    }

    async fn with_conn<T, F>(&self, f: F) -> WeiserResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> WeiserResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| WeiserError::connection(STORE_TARGET, "store connection poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| WeiserError::connection(STORE_TARGET, format!("task join failed: {}", e)))?
    }

    /// Roll the schema back to `target_version`. Never called by the
    /// runner; operators invoke it deliberately.
    pub async fn downgrade(&self, target_version: i64) -> WeiserResult<()> {
        self.with_conn(move |conn| {
            for (version, script) in DOWNGRADES {
                if *version <= target_version {
                    continue;
                }
                conn.execute_batch(&format!(
                    "BEGIN; {} DELETE FROM migrations WHERE version = {}; COMMIT;",
                    script, version
                ))
                .map_err(|e| {
                    let _ = conn.execute_batch("ROLLBACK;");
                    WeiserError::query(STORE_TARGET, e.to_string(), *script)
                })?;
                tracing::info!("downgraded metric store migration {}", version);
            }
            Ok(())
        })
        .await
    }
}

fn applied_versions(conn: &Connection) -> WeiserResult<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT version FROM migrations ORDER BY version")
        .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "SELECT version"))?;
    let versions = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "SELECT version"))?;
    Ok(versions)
}

fn format_ts(ts: &chrono::NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl MetricStore for DuckDbMetricStore {
    async fn initialize(&self) -> WeiserResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS migrations (
                    version     BIGINT PRIMARY KEY,
                    description VARCHAR NOT NULL,
                    applied_at  TIMESTAMP NOT NULL DEFAULT current_timestamp
                );",
            )
            .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "CREATE migrations"))?;

            let applied = applied_versions(conn)?;

            for (version, description, script) in MIGRATIONS {
                if applied.contains(version) {
                    continue;
                }
                let ledger_entry = format!(
                    "INSERT INTO migrations (version, description) VALUES ({}, {});",
                    version,
                    sql_quote(description)
                );
                conn.execute_batch(&format!("BEGIN; {} {} COMMIT;", script, ledger_entry))
                    .map_err(|e| {
                        let _ = conn.execute_batch("ROLLBACK;");
                        tracing::error!("metric store migration {} failed: {}", version, e);
                        WeiserError::query(STORE_TARGET, e.to_string(), *script)
                    })?;
                tracing::info!("applied metric store migration {}: {}", version, description);
            }
            Ok(())
        })
        .await
    }

    async fn write(&self, record: &MetricRecord) -> WeiserResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let threshold_list = if record.threshold_list.is_empty() {
                None
            } else {
                serde_json::to_string(&record.threshold_list).ok()
            };
            let dimensions = serde_json::to_string(&record.dimensions)
                .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "encode dims"))?;

            conn.execute(
                "INSERT INTO metrics (
                    actual_value, check_id, run_id, name, datasource, dataset,
                    type, condition, threshold, threshold_list, success, fail,
                    run_time, dimensions, time_bucket
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), ?, CAST(? AS TIMESTAMP))",
                params![
                    record.actual_value,
                    record.check_id,
                    record.run_id,
                    record.name,
                    record.datasource,
                    record.dataset,
                    record.check_type.as_str(),
                    record.condition.as_str(),
                    record.threshold,
                    threshold_list,
                    record.success,
                    record.fail,
                    format_ts(&record.run_time),
                    dimensions,
                    record.time_bucket.as_ref().map(format_ts),
                ],
            )
            .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "INSERT metrics"))?;
            Ok(())
        })
        .await
    }

    async fn history(
        &self,
        check_id: Option<&str>,
        predicate: Option<&str>,
    ) -> WeiserResult<Vec<f64>> {
        let check_id = check_id.map(str::to_string);
        let predicate = predicate.map(str::to_string);

        self.with_conn(move |conn| {
            let mut sql =
                String::from("SELECT actual_value FROM metrics WHERE actual_value IS NOT NULL");
            if check_id.is_some() {
                sql.push_str(" AND check_id = ?");
            }
            if let Some(pred) = &predicate {
                sql.push_str(&format!(" AND ({})", pred));
            }
            sql.push_str(" ORDER BY run_time ASC, id ASC");

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), &sql))?;

            let map_row = |row: &duckdb::Row| row.get::<_, f64>(0);
            let rows = match &check_id {
                Some(id) => stmt.query_map(params![id], map_row),
                None => stmt.query_map([], map_row),
            }
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), &sql))?;

            Ok(rows)
        })
        .await
    }

    async fn close(&self) -> WeiserResult<()> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };

        let mut setup = String::from("INSTALL httpfs; LOAD httpfs;");
        if let Some(region) = &mirror.region {
            setup.push_str(&format!(" SET s3_region = {};", sql_quote(region)));
        }
        if let Some(key) = &mirror.access_key {
            setup.push_str(&format!(" SET s3_access_key_id = {};", sql_quote(key)));
        }
        if let Some(secret) = &mirror.secret_access_key {
            setup.push_str(&format!(" SET s3_secret_access_key = {};", sql_quote(secret)));
        }
        if let Some(endpoint) = &mirror.endpoint {
            setup.push_str(&format!(" SET s3_endpoint = {};", sql_quote(endpoint)));
        }
        if let Some(style) = &mirror.url_style {
            setup.push_str(&format!(" SET s3_url_style = {};", sql_quote(style)));
        }
        let copy = format!(
            "COPY (SELECT * FROM metrics) TO 's3://{}/weiser/metrics.parquet' (FORMAT PARQUET);",
            mirror.bucket
        );

        self.with_conn(move |conn| {
            conn.execute_batch(&format!("{} {}", setup, copy)).map_err(|e| {
                tracing::error!("metric store mirror failed: {}", e);
                WeiserError::query(STORE_TARGET, e.to_string(), &copy)
            })?;
            tracing::info!("mirrored metrics table to object storage");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckType, Condition};
    use chrono::Utc;

    fn memory_config() -> ConnectionConfig {
        serde_yaml::from_str("type: metricstore\ndb_type: duckdb").unwrap()
    }

    fn record(check_id: &str, value: f64, run_time: chrono::NaiveDateTime) -> MetricRecord {
        MetricRecord {
            id: None,
            run_id: "run-1".into(),
            check_id: check_id.into(),
            name: "orders_count".into(),
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

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = DuckDbMetricStore::open(&memory_config(), true).unwrap();
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        let versions = store.with_conn(applied_versions).await.unwrap();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_write_and_history_order() {
        let store = DuckDbMetricStore::open(&memory_config(), true).unwrap();
        store.initialize().await.unwrap();

        let base = Utc::now().naive_utc();
        // Insert out of chronological order; history must sort by run_time.
        store
            .write(&record("abc", 2.0, base + chrono::Duration::seconds(10)))
            .await
            .unwrap();
        store.write(&record("abc", 1.0, base)).await.unwrap();
        store
            .write(&record("other", 99.0, base + chrono::Duration::seconds(5)))
            .await
            .unwrap();

        let history = store.history(Some("abc"), None).await.unwrap();
        assert_eq!(history, vec![1.0, 2.0]);
        assert_eq!(store.last_value("abc").await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn test_history_predicate_narrows() {
        let store = DuckDbMetricStore::open(&memory_config(), true).unwrap();
        store.initialize().await.unwrap();

        let base = Utc::now().naive_utc();
        let mut a = record("abc", 1.0, base);
        a.dataset = "orders".into();
        let mut b = record("abc", 2.0, base + chrono::Duration::seconds(1));
        b.dataset = "vendors".into();
        store.write(&a).await.unwrap();
        store.write(&b).await.unwrap();

        let narrowed = store
            .history(Some("abc"), Some("dataset = 'orders'"))
            .await
            .unwrap();
        assert_eq!(narrowed, vec![1.0]);

        let by_predicate_only = store
            .history(None, Some("dataset = 'vendors'"))
            .await
            .unwrap();
        assert_eq!(by_predicate_only, vec![2.0]);
    }

    #[tokio::test]
    async fn test_null_actuals_are_excluded_from_history() {
        let store = DuckDbMetricStore::open(&memory_config(), true).unwrap();
        store.initialize().await.unwrap();

        let mut failed = record("abc", 0.0, Utc::now().naive_utc());
        failed.actual_value = None;
        failed.success = false;
        failed.fail = true;
        store.write(&failed).await.unwrap();

        assert!(store.history(Some("abc"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_list_round_trip_encoding() {
        let store = DuckDbMetricStore::open(&memory_config(), true).unwrap();
        store.initialize().await.unwrap();

        let mut rec = record("abc", 1500.0, Utc::now().naive_utc());
        rec.condition = Condition::Between;
        rec.threshold = None;
        rec.threshold_list = vec![1000.0, 2000.0];
        store.write(&rec).await.unwrap();

        let stored: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT threshold_list FROM metrics WHERE check_id = 'abc'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "read"))
            })
            .await
            .unwrap();
        assert_eq!(stored, "[1000.0,2000.0]");
    }

    #[tokio::test]
    async fn test_downgrade_removes_schema() {
        let store = DuckDbMetricStore::open(&memory_config(), true).unwrap();
        store.initialize().await.unwrap();
        store.downgrade(0).await.unwrap();

        let versions = store.with_conn(applied_versions).await.unwrap();
        assert!(versions.is_empty());

        // Re-initialize brings the schema back.
        store.initialize().await.unwrap();
        let versions = store.with_conn(applied_versions).await.unwrap();
        assert_eq!(versions, vec![1, 2]);
    }
}
