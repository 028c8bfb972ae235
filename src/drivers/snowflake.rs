// Snowflake driver over the SQL statements API.
//
// Statements are submitted to `/api/v2/statements`; long-running queries
// come back as 202 with a statement handle that is polled until the result
// is ready. Authentication uses a pre-acquired bearer token (OAuth or
// programmatic access token) from the connection record; token acquisition
// itself is outside the engine.

use crate::drivers::{Row, Scalar, SourceDriver};
use crate::models::DatasourceConfig;
use crate::sql::Dialect;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: usize = 120;

pub struct SnowflakeDriver {
    name: String,
    http_client: Client,
    base_url: String,
    token: String,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
}

impl SnowflakeDriver {
    pub fn new(config: &DatasourceConfig) -> WeiserResult<Self> {
        let account = config.account.as_deref().ok_or_else(|| {
            WeiserError::connection(&config.name, "snowflake datasource requires 'account'")
        })?;
        let token = config
            .access_token
            .clone()
            .or_else(|| config.password.clone())
            .ok_or_else(|| {
                WeiserError::connection(
                    &config.name,
                    "snowflake datasource requires 'access_token' or 'password'",
                )
            })?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WeiserError::connection(&config.name, e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            http_client,
            base_url: format!("https://{}.snowflakecomputing.com", account),
            token,
            database: config.db_name.clone(),
            schema: config.schema_name.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
        })
    }

    async fn submit(&self, sql: &str) -> WeiserResult<Value> {
        let mut body = json!({ "statement": sql });
        if let Some(db) = &self.database {
            body["database"] = json!(db);
        }
        if let Some(schema) = &self.schema {
            body["schema"] = json!(schema);
        }
        if let Some(warehouse) = &self.warehouse {
            body["warehouse"] = json!(warehouse);
        }
        if let Some(role) = &self.role {
            body["role"] = json!(role);
        }

        let response = self
            .http_client
            .post(format!("{}/api/v2/statements", self.base_url))
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
            .json(&body)
            .send()
            .await
            .map_err(|e| WeiserError::connection(&self.name, e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| WeiserError::query(&self.name, e.to_string(), sql))?;

        if status.as_u16() == 202 {
            let handle = payload["statementHandle"]
                .as_str()
                .ok_or_else(|| {
                    WeiserError::query(&self.name, "202 response without statementHandle", sql)
                })?
                .to_string();
            return self.poll(&handle, sql).await;
        }

        if !status.is_success() {
            let message = payload["message"].as_str().unwrap_or("statement rejected");
            return Err(WeiserError::query(&self.name, message, sql));
        }

        Ok(payload)
    }

    async fn poll(&self, handle: &str, sql: &str) -> WeiserResult<Value> {
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .http_client
                .get(format!("{}/api/v2/statements/{}", self.base_url, handle))
                .bearer_auth(&self.token)
                .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
                .send()
                .await
                .map_err(|e| WeiserError::connection(&self.name, e.to_string()))?;

            let status = response.status();
            let payload: Value = response
                .json()
                .await
                .map_err(|e| WeiserError::query(&self.name, e.to_string(), sql))?;

            if status.as_u16() == 202 {
                continue;
            }
            if !status.is_success() {
                let message = payload["message"].as_str().unwrap_or("statement failed");
                return Err(WeiserError::query(&self.name, message, sql));
            }
            return Ok(payload);
        }

        Err(WeiserError::query(&self.name, "statement polling timed out", sql))
    }
}

#[async_trait]
impl SourceDriver for SnowflakeDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Snowflake
    }

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>> {
        let payload = self.submit(sql).await?;
        parse_result_set(&self.name, &payload, sql)
    }
}

/// Decode a Snowflake result set: `resultSetMetaData.rowType` describes the
/// columns, `data` holds rows of nullable strings.
fn parse_result_set(name: &str, payload: &Value, sql: &str) -> WeiserResult<Vec<Row>> {
    let row_type = payload["resultSetMetaData"]["rowType"]
        .as_array()
        .ok_or_else(|| WeiserError::query(name, "response missing rowType metadata", sql))?;
    let data = payload["data"]
        .as_array()
        .ok_or_else(|| WeiserError::query(name, "response missing data", sql))?;

    let columns: Vec<(String, i64)> = row_type
        .iter()
        .map(|c| {
            (
                c["type"].as_str().unwrap_or("TEXT").to_ascii_uppercase(),
                c["scale"].as_i64().unwrap_or(0),
            )
        })
        .collect();

    let mut rows = Vec::with_capacity(data.len());
    for raw_row in data {
        let cells = raw_row
            .as_array()
            .ok_or_else(|| WeiserError::query(name, "malformed data row", sql))?;
        let mut row = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            let (col_type, scale) = columns
                .get(i)
                .map(|(t, s)| (t.as_str(), *s))
                .unwrap_or(("TEXT", 0));
            row.push(decode_cell(cell, col_type, scale));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn decode_cell(cell: &Value, col_type: &str, scale: i64) -> Scalar {
    let text = match cell.as_str() {
        Some(s) => s,
        None => return Scalar::Null,
    };

    match col_type {
        "FIXED" if scale == 0 => text
            .parse::<i64>()
            .map_or_else(|_| Scalar::Text(text.to_string()), Scalar::Int),
        "FIXED" | "REAL" | "FLOAT" | "DOUBLE" => text
            .parse::<f64>()
            .map_or_else(|_| Scalar::Text(text.to_string()), Scalar::Float),
        "BOOLEAN" => match text {
            "true" | "TRUE" | "1" => Scalar::Bool(true),
            "false" | "FALSE" | "0" => Scalar::Bool(false),
            _ => Scalar::Text(text.to_string()),
        },
        // Timestamps arrive as epoch seconds with a fractional part.
        "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" => text
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(|epoch| {
                chrono::DateTime::from_timestamp(
                    epoch.trunc() as i64,
                    (epoch.fract() * 1e9) as u32,
                )
            })
            .map_or_else(|| Scalar::Text(text.to_string()), |dt| {
                Scalar::Timestamp(dt.naive_utc())
            }),
        // Dates arrive as days since the epoch.
        "DATE" => text
            .parse::<i64>()
            .ok()
            .and_then(|days| chrono::DateTime::from_timestamp(days * 86_400, 0))
            .map_or_else(|| Scalar::Text(text.to_string()), |dt| {
                Scalar::Timestamp(dt.naive_utc())
            }),
        _ => Scalar::Text(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_result_set() {
        let payload = json!({
            "resultSetMetaData": {
                "rowType": [
                    {"name": "TENANT", "type": "text"},
                    {"name": "COUNT(*)", "type": "fixed", "scale": 0}
                ]
            },
            "data": [["acme", "42"], ["globex", "7"], [null, "0"]]
        });
        let rows = parse_result_set("sf", &payload, "select 1").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![Scalar::Text("acme".into()), Scalar::Int(42)]);
        assert_eq!(rows[2][0], Scalar::Null);
    }

    #[test]
    fn test_decode_fixed_with_scale_is_float() {
        assert_eq!(decode_cell(&json!("10.25"), "FIXED", 2), Scalar::Float(10.25));
    }

    #[test]
    fn test_decode_boolean_and_date() {
        assert_eq!(decode_cell(&json!("true"), "BOOLEAN", 0), Scalar::Bool(true));
        match decode_cell(&json!("20000"), "DATE", 0) {
            Scalar::Timestamp(_) => {},
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_metadata_is_query_error() {
        let payload = json!({"data": []});
        assert!(parse_result_set("sf", &payload, "select 1").is_err());
    }
}
