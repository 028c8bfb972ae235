// PostgreSQL metric store.
//
// Schema is managed by sqlx's migrator over the versioned `migrations/`
// directory; the server-side `_sqlx_migrations` table tracks applied
// versions, so `initialize()` is a no-op at head.

use crate::models::{ConnectionConfig, MetricRecord};
use crate::store::MetricStore;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

const STORE_TARGET: &str = "metricstore";

pub struct PostgresMetricStore {
    pool: PgPool,
}

impl PostgresMetricStore {
    pub async fn connect(config: &ConnectionConfig) -> WeiserResult<Self> {
        let uri = match &config.uri {
            Some(uri) => uri.clone(),
            None => {
                let host = config.host.as_deref().unwrap_or("localhost");
                let port = config.port.unwrap_or(5432);
                let db = config.db_name.as_deref().unwrap_or("weiser");
                let user = config.user.as_deref().unwrap_or("postgres");
                let password = config.password.as_deref().unwrap_or("");
                format!("postgresql://{}:{}@{}:{}/{}", user, password, host, port, db)
            },
        };

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await
            .map_err(|e| {
                tracing::error!("failed to connect to metric store: {}", e);
                WeiserError::connection(STORE_TARGET, e.to_string())
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MetricStore for PostgresMetricStore {
    async fn initialize(&self) -> WeiserResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| WeiserError::connection(STORE_TARGET, e.to_string()))?;
        Ok(())
    }

    async fn write(&self, record: &MetricRecord) -> WeiserResult<()> {
        let threshold_list = if record.threshold_list.is_empty() {
            None
        } else {
            serde_json::to_string(&record.threshold_list).ok()
        };
        let dimensions = serde_json::to_string(&record.dimensions)
            .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "encode dims"))?;

        sqlx::query(
            "INSERT INTO metrics (
                actual_value, check_id, run_id, name, datasource, dataset,
                type, condition, threshold, threshold_list, success, fail,
                run_time, dimensions, time_bucket
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(record.actual_value)
        .bind(&record.check_id)
        .bind(&record.run_id)
        .bind(&record.name)
        .bind(&record.datasource)
        .bind(&record.dataset)
        .bind(record.check_type.as_str())
        .bind(record.condition.as_str())
        .bind(record.threshold)
        .bind(threshold_list)
        .bind(record.success)
        .bind(record.fail)
        .bind(record.run_time)
        .bind(dimensions)
        .bind(record.time_bucket)
        .execute(&self.pool)
        .await
        .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), "INSERT metrics"))?;

        Ok(())
    }

    async fn history(
        &self,
        check_id: Option<&str>,
        predicate: Option<&str>,
    ) -> WeiserResult<Vec<f64>> {
        let mut sql =
            String::from("SELECT actual_value FROM metrics WHERE actual_value IS NOT NULL");
        if check_id.is_some() {
            sql.push_str(" AND check_id = $1");
        }
        if let Some(pred) = predicate {
            sql.push_str(&format!(" AND ({})", pred));
        }
        sql.push_str(" ORDER BY run_time ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(id) = check_id {
            query = query.bind(id.to_string());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), &sql))?;

        rows.iter()
            .map(|row| {
                row.try_get::<f64, _>(0)
                    .map_err(|e| WeiserError::query(STORE_TARGET, e.to_string(), &sql))
            })
            .collect()
    }

    async fn close(&self) -> WeiserResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
