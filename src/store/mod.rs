// Metric store
//
// Append-only persistence of evaluation records, also read back by
// anomaly checks. Two interchangeable backends: the embedded DuckDB store
// (file-backed, optional S3 mirror on shutdown) and PostgreSQL. Both own
// their schema and migration discipline and expose the same contract.

pub mod duckdb;
pub mod postgres;

use crate::models::{ConnectionConfig, MetricRecord, StoreBackend};
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Store contract consumed by the runner and the anomaly analyzer.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Ensure the schema exists and all pending migrations are applied.
    /// Safe to call repeatedly.
    async fn initialize(&self) -> WeiserResult<()>;

    /// Append one record. Records are never updated in place; callers must
    /// not retry a successful write.
    async fn write(&self, record: &MetricRecord) -> WeiserResult<()>;

    /// Recorded actual values for a check, ordered by run time ascending.
    ///
    /// `check_id` may be None when a free-form predicate selects the
    /// history instead; with both, the predicate narrows the check's
    /// history. NULL actuals (errored leaves) are excluded.
    async fn history(
        &self,
        check_id: Option<&str>,
        predicate: Option<&str>,
    ) -> WeiserResult<Vec<f64>>;

    /// Most recent recorded value for a check.
    async fn last_value(&self, check_id: &str) -> WeiserResult<Option<f64>> {
        Ok(self.history(Some(check_id), None).await?.last().copied())
    }

    /// Flush and release the backend; the embedded store mirrors to object
    /// storage here when configured.
    async fn close(&self) -> WeiserResult<()>;
}

/// Select and open the configured store backend.
///
/// `mirror_enabled` is the CLI's `-s` switch: when false the embedded
/// store skips its shutdown mirror even if S3 fields are configured.
pub async fn open_store(
    config: &ConnectionConfig,
    mirror_enabled: bool,
) -> WeiserResult<Arc<dyn MetricStore>> {
    if !config.is_metric_store() {
        return Err(WeiserError::config(format!(
            "connection type '{}' is not a metric store",
            config.connection_type
        )));
    }

    let store: Arc<dyn MetricStore> = match config.db_type {
        StoreBackend::Duckdb => {
            Arc::new(duckdb::DuckDbMetricStore::open(config, mirror_enabled)?)
        },
        StoreBackend::Postgresql => {
            Arc::new(postgres::PostgresMetricStore::connect(config).await?)
        },
    };

    store.initialize().await?;
    Ok(store)
}
