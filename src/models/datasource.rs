// Declarative connection records for data sources and the metric store.

use serde::{Deserialize, Serialize};

/// Engine family of a declared data source. Cube endpoints speak the
/// PostgreSQL wire protocol and share that driver path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Postgresql,
    Mysql,
    Cube,
    Snowflake,
    Databricks,
    Bigquery,
    Duckdb,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Postgresql => "postgresql",
            SourceType::Mysql => "mysql",
            SourceType::Cube => "cube",
            SourceType::Snowflake => "snowflake",
            SourceType::Databricks => "databricks",
            SourceType::Bigquery => "bigquery",
            SourceType::Duckdb => "duckdb",
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    120
}

/// One entry under `datasources:`. Either individual fields or a full
/// `uri` suffices; type-specific fields are plain optionals so a single
/// record shape covers every engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub source_type: SourceType,

    // Host-based connection fields
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,

    // Snowflake
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,

    // Databricks
    #[serde(default)]
    pub http_path: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,

    // BigQuery
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub credentials_path: Option<String>,
    #[serde(default)]
    pub location: Option<String>,

    // Embedded engine
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-leaf query timeout for this source.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Backend of the metric store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Duckdb,
    Postgresql,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Duckdb
    }
}

fn default_connection_type() -> String {
    "metricstore".to_string()
}

/// One entry under `connections:`. At least one `type: metricstore` record
/// is required; the embedded backend may carry S3 mirror fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "type", default = "default_connection_type")]
    pub connection_type: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub db_type: StoreBackend,

    /// DuckDB database file; in-memory when absent.
    #[serde(default)]
    pub path: Option<String>,

    // PostgreSQL backend fields
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    // Object-storage mirror for the embedded backend
    #[serde(default)]
    pub s3_access_key: Option<String>,
    #[serde(default)]
    pub s3_secret_access_key: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_url_style: Option<String>,
}

impl ConnectionConfig {
    pub fn is_metric_store(&self) -> bool {
        self.connection_type == "metricstore"
    }
}
