// PostgreSQL driver, also used for Cube semantic-layer endpoints (they
// speak the PostgreSQL wire protocol).

use crate::drivers::{Row, Scalar, SourceDriver};
use crate::models::DatasourceConfig;
use crate::sql::Dialect;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo};

pub struct PostgresDriver {
    name: String,
    pool: PgPool,
}

impl PostgresDriver {
    pub async fn connect(config: &DatasourceConfig) -> WeiserResult<Self> {
        let uri = match &config.uri {
            Some(uri) => uri.clone(),
            None => {
                let host = config.host.as_deref().unwrap_or("localhost");
                let port = config.port.unwrap_or(5432);
                let db = config.db_name.as_deref().unwrap_or("postgres");
                let user = config.user.as_deref().unwrap_or("postgres");
                let password = config.password.as_deref().unwrap_or("");
                format!("postgresql://{}:{}@{}:{}/{}", user, password, host, port, db)
            },
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size as u32)
            .connect(&uri)
            .await
            .map_err(|e| {
                tracing::error!("failed to connect to datasource '{}': {}", config.name, e);
                WeiserError::connection(&config.name, e.to_string())
            })?;

        Ok(Self { name: config.name.clone(), pool })
    }

    fn decode_row(&self, row: &PgRow) -> WeiserResult<Row> {
        let mut values = Vec::with_capacity(row.columns().len());
        for (i, column) in row.columns().iter().enumerate() {
            let scalar = match column.type_info().name() {
                "INT2" => row
                    .try_get::<Option<i16>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, |v| Scalar::Int(v as i64))),
                "INT4" => row
                    .try_get::<Option<i32>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, |v| Scalar::Int(v as i64))),
                "INT8" => row
                    .try_get::<Option<i64>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, Scalar::Int)),
                "FLOAT4" => row
                    .try_get::<Option<f32>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, |v| Scalar::Float(v as f64))),
                "FLOAT8" => row
                    .try_get::<Option<f64>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, Scalar::Float)),
                "NUMERIC" => row.try_get::<Option<rust_decimal::Decimal>, _>(i).map(|v| {
                    v.and_then(|d| d.to_f64()).map_or(Scalar::Null, Scalar::Float)
                }),
                "BOOL" => row
                    .try_get::<Option<bool>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, Scalar::Bool)),
                "TIMESTAMP" => row
                    .try_get::<Option<chrono::NaiveDateTime>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, Scalar::Timestamp)),
                "TIMESTAMPTZ" => row
                    .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, |v| Scalar::Timestamp(v.naive_utc()))),
                "DATE" => row.try_get::<Option<chrono::NaiveDate>, _>(i).map(|v| {
                    v.and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map_or(Scalar::Null, Scalar::Timestamp)
                }),
                _ => row
                    .try_get::<Option<String>, _>(i)
                    .map(|v| v.map_or(Scalar::Null, Scalar::Text)),
            };

            match scalar {
                Ok(value) => values.push(value),
                Err(e) => {
                    tracing::debug!(
                        "column {} ({}) did not decode: {}; recording NULL",
                        column.name(),
                        column.type_info().name(),
                        e
                    );
                    values.push(Scalar::Null);
                },
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl SourceDriver for PostgresDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(|e| {
            tracing::error!("query failed on '{}': {}", self.name, e);
            WeiserError::query(&self.name, e.to_string(), sql)
        })?;

        rows.iter().map(|row| self.decode_row(row)).collect()
    }
}
