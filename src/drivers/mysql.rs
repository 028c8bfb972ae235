// MySQL driver.

use crate::drivers::{Row, Scalar, SourceDriver};
use crate::models::DatasourceConfig;
use crate::sql::Dialect;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts, Value};

pub struct MySqlDriver {
    name: String,
    pool: Pool,
}

impl MySqlDriver {
    pub fn connect(config: &DatasourceConfig) -> WeiserResult<Self> {
        let opts = match &config.uri {
            Some(uri) => Opts::from_url(uri)
                .map_err(|e| WeiserError::connection(&config.name, e.to_string()))?,
            None => {
                let max = config.pool_size.max(1);
                let constraints = PoolConstraints::new(1, max).ok_or_else(|| {
                    WeiserError::connection(&config.name, "invalid pool constraints")
                })?;
                OptsBuilder::default()
                    .ip_or_hostname(config.host.clone().unwrap_or_else(|| "localhost".into()))
                    .tcp_port(config.port.unwrap_or(3306))
                    .user(config.user.clone())
                    .pass(config.password.clone())
                    .db_name(config.db_name.clone())
                    .prefer_socket(false)
                    .ssl_opts(None::<SslOpts>)
                    .tcp_keepalive(Some(30_000_u32))
                    .tcp_nodelay(true)
                    .pool_opts(
                        PoolOpts::default()
                            .with_constraints(constraints)
                            .with_inactive_connection_ttl(std::time::Duration::from_secs(300)),
                    )
                    .into()
            },
        };

        Ok(Self { name: config.name.clone(), pool: Pool::new(opts) })
    }
}

#[async_trait]
impl SourceDriver for MySqlDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>> {
        let mut conn = self.pool.get_conn().await.map_err(|e| {
            tracing::error!("failed to get connection from pool '{}': {}", self.name, e);
            WeiserError::connection(&self.name, e.to_string())
        })?;

        let rows: Vec<mysql_async::Row> = conn.query(sql).await.map_err(|e| {
            tracing::error!("query failed on '{}': {}", self.name, e);
            WeiserError::query(&self.name, e.to_string(), sql)
        })?;

        drop(conn);

        Ok(rows
            .iter()
            .map(|row| {
                (0..row.columns_ref().len())
                    .map(|i| value_to_scalar(&row[i]))
                    .collect()
            })
            .collect())
    }
}

fn value_to_scalar(value: &Value) -> Scalar {
    match value {
        Value::NULL => Scalar::Null,
        Value::Bytes(bytes) => Scalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Scalar::Int(*v),
        Value::UInt(v) => Scalar::Int(*v as i64),
        Value::Float(v) => Scalar::Float(*v as f64),
        Value::Double(v) => Scalar::Float(*v),
        Value::Date(year, month, day, hour, minute, second, _micro) => {
            NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                .and_then(|d| d.and_hms_opt(*hour as u32, *minute as u32, *second as u32))
                .map_or(Scalar::Null, Scalar::Timestamp)
        },
        Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + (*hours as u32);
            Scalar::Text(format!("{}:{:02}:{:02}", total_hours, minutes, seconds))
        },
    }
}
