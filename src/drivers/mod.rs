// Source drivers
//
// One driver per declared source, constructed from its declarative
// connection record and cached by name. Every driver normalizes engine
// values to the same small scalar set and exposes the same execute
// contract, so the runner never sees engine-specific types.

pub mod bigquery;
pub mod databricks;
pub mod duckdb_src;
pub mod mysql;
pub mod postgres;
pub mod snowflake;

use crate::models::{DatasourceConfig, SourceType};
use crate::sql::Dialect;
use crate::utils::WeiserResult;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use std::sync::Arc;

/// Driver-normalized scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Null,
}

impl Scalar {
    /// Numeric view of the scalar; measured values travel through this.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Timestamp(_) | Scalar::Null => None,
        }
    }

    /// Timestamp view, used for time-bucket columns. Text falls back to
    /// the common wire formats the engines emit for truncated buckets.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Scalar::Timestamp(ts) => Some(*ts),
            Scalar::Text(s) => {
                let s = s.trim();
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                    .ok()
                    .or_else(|| {
                        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                    })
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Text(s) => f.write_str(s),
            Scalar::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Scalar::Null => f.write_str("NULL"),
        }
    }
}

pub type Row = Vec<Scalar>;

/// Execute contract shared by every engine path.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Declared datasource name.
    fn name(&self) -> &str;

    /// Dialect the composer should emit for this source.
    fn dialect(&self) -> Dialect;

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>>;
}

pub fn dialect_for(source_type: SourceType) -> Dialect {
    match source_type {
        SourceType::Postgresql | SourceType::Cube => Dialect::Postgres,
        SourceType::Mysql => Dialect::MySql,
        SourceType::Snowflake => Dialect::Snowflake,
        SourceType::Databricks => Dialect::Databricks,
        SourceType::Bigquery => Dialect::BigQuery,
        SourceType::Duckdb => Dialect::DuckDb,
    }
}

/// Construct a driver for one datasource record.
pub async fn create_driver(config: &DatasourceConfig) -> WeiserResult<Arc<dyn SourceDriver>> {
    let driver: Arc<dyn SourceDriver> = match config.source_type {
        SourceType::Postgresql | SourceType::Cube => {
            Arc::new(postgres::PostgresDriver::connect(config).await?)
        },
        SourceType::Mysql => Arc::new(mysql::MySqlDriver::connect(config)?),
        SourceType::Snowflake => Arc::new(snowflake::SnowflakeDriver::new(config)?),
        SourceType::Databricks => Arc::new(databricks::DatabricksDriver::new(config)?),
        SourceType::Bigquery => Arc::new(bigquery::BigQueryDriver::new(config)?),
        SourceType::Duckdb => Arc::new(duckdb_src::DuckDbDriver::open(config)?),
    };
    Ok(driver)
}

/// Cache of live drivers keyed by datasource name.
///
/// Fast path is a lock-free read; the pool behind each driver is created
/// once and reused for every leaf that targets the source.
pub struct DriverManager {
    drivers: DashMap<String, Arc<dyn SourceDriver>>,
}

impl DriverManager {
    pub fn new() -> Self {
        Self { drivers: DashMap::new() }
    }

    pub async fn get(&self, config: &DatasourceConfig) -> WeiserResult<Arc<dyn SourceDriver>> {
        if let Some(driver) = self.drivers.get(&config.name) {
            return Ok(Arc::clone(&driver));
        }

        let driver = create_driver(config).await?;
        self.drivers.insert(config.name.clone(), Arc::clone(&driver));
        tracing::info!(
            "created {} driver for datasource '{}'",
            config.source_type.as_str(),
            config.name
        );
        Ok(driver)
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

impl Default for DriverManager {
    fn default() -> Self {
        Self::new()
    }
}
