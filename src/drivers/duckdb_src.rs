// Embedded DuckDB driver.
//
// Used for `type: duckdb` datasources and for in-process runs; the metric
// store's embedded backend keeps its own connection. DuckDB's API is
// synchronous, so queries run on the blocking pool behind a mutex-guarded
// connection.

use crate::drivers::{Row, Scalar, SourceDriver};
use crate::models::DatasourceConfig;
use crate::sql::Dialect;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use chrono::DateTime;
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::Connection;
use rust_decimal::prelude::ToPrimitive;
use std::sync::{Arc, Mutex};

pub struct DuckDbDriver {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbDriver {
    pub fn open(config: &DatasourceConfig) -> WeiserResult<Self> {
        let conn = match config.path.as_deref() {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| {
            tracing::error!("failed to open duckdb for '{}': {}", config.name, e);
            WeiserError::connection(&config.name, e.to_string())
        })?;

        Ok(Self {
            name: config.name.clone(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

}

#[async_trait]
impl SourceDriver for DuckDbDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>> {
        let conn = Arc::clone(&self.conn);
        let sql_owned = sql.to_string();
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || -> WeiserResult<Vec<Row>> {
            let conn = conn
                .lock()
                .map_err(|_| WeiserError::connection(&name, "duckdb connection poisoned"))?;
            let mut stmt = conn
                .prepare(&sql_owned)
                .map_err(|e| WeiserError::query(&name, e.to_string(), &sql_owned))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| WeiserError::query(&name, e.to_string(), &sql_owned))?;

            let mut out = Vec::new();
            while let Some(row) = rows
                .next()
                .map_err(|e| WeiserError::query(&name, e.to_string(), &sql_owned))?
            {
                let column_count = row.as_ref().column_count();
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value = row
                        .get_ref(i)
                        .map_err(|e| WeiserError::query(&name, e.to_string(), &sql_owned))?;
                    values.push(value_ref_to_scalar(value));
                }
                out.push(values);
            }
            Ok(out)
        })
        .await
        .map_err(|e| WeiserError::query(&self.name, format!("task join failed: {}", e), sql))?
    }
}

pub(crate) fn value_ref_to_scalar(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Boolean(v) => Scalar::Bool(v),
        ValueRef::TinyInt(v) => Scalar::Int(v as i64),
        ValueRef::SmallInt(v) => Scalar::Int(v as i64),
        ValueRef::Int(v) => Scalar::Int(v as i64),
        ValueRef::BigInt(v) => Scalar::Int(v),
        ValueRef::HugeInt(v) => Scalar::Int(v as i64),
        ValueRef::UTinyInt(v) => Scalar::Int(v as i64),
        ValueRef::USmallInt(v) => Scalar::Int(v as i64),
        ValueRef::UInt(v) => Scalar::Int(v as i64),
        ValueRef::UBigInt(v) => Scalar::Int(v as i64),
        ValueRef::Float(v) => Scalar::Float(v as f64),
        ValueRef::Double(v) => Scalar::Float(v),
        ValueRef::Decimal(d) => rust_decimal::Decimal::try_from(d)
            .ok()
            .and_then(|rd| rd.to_f64())
            .map_or(Scalar::Null, Scalar::Float),
        ValueRef::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map_or(Scalar::Null, |dt| Scalar::Timestamp(dt.naive_utc()))
        },
        ValueRef::Date32(days) => DateTime::from_timestamp(i64::from(days) * 86_400, 0)
            .map_or(Scalar::Null, |dt| Scalar::Timestamp(dt.naive_utc())),
        ValueRef::Text(bytes) => Scalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        other => {
            tracing::debug!("unmapped duckdb value {:?}; recording NULL", other);
            Scalar::Null
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_normalization() {
        assert_eq!(value_ref_to_scalar(ValueRef::Null), Scalar::Null);
        assert_eq!(value_ref_to_scalar(ValueRef::BigInt(4)), Scalar::Int(4));
        assert_eq!(value_ref_to_scalar(ValueRef::Boolean(true)), Scalar::Bool(true));
        assert_eq!(value_ref_to_scalar(ValueRef::Double(2.5)), Scalar::Float(2.5));
        assert_eq!(
            value_ref_to_scalar(ValueRef::Text(b"abc")),
            Scalar::Text("abc".into())
        );
    }

    #[test]
    fn test_timestamp_unit_conversion() {
        let micros = 1_717_200_000_000_000_i64;
        match value_ref_to_scalar(ValueRef::Timestamp(TimeUnit::Microsecond, micros)) {
            Scalar::Timestamp(ts) => {
                assert_eq!(ts.format("%Y-%m-%d").to_string(), "2024-06-01")
            },
            other => panic!("expected timestamp, got {:?}", other),
        }
        match value_ref_to_scalar(ValueRef::Timestamp(TimeUnit::Second, micros / 1_000_000)) {
            Scalar::Timestamp(ts) => {
                assert_eq!(ts.format("%Y-%m-%d").to_string(), "2024-06-01")
            },
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_normalizes_rows() {
        let config: crate::models::DatasourceConfig =
            serde_yaml::from_str("name: mem\ntype: duckdb").unwrap();
        let driver = DuckDbDriver::open(&config).unwrap();
        let rows = driver.execute("SELECT 1, 'a', NULL, 2.5").await.unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Scalar::Int(1),
                Scalar::Text("a".into()),
                Scalar::Null,
                Scalar::Float(2.5),
            ]]
        );
    }

    #[tokio::test]
    async fn test_query_error_carries_sql() {
        let config: crate::models::DatasourceConfig =
            serde_yaml::from_str("name: mem\ntype: duckdb").unwrap();
        let driver = DuckDbDriver::open(&config).unwrap();
        let err = driver.execute("SELECT * FROM no_such_table").await.unwrap_err();
        assert!(err.to_string().contains("no_such_table"));
    }
}
