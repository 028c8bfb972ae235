// Databricks driver over the SQL statement execution API.
//
// The warehouse id is taken from the trailing segment of the configured
// `http_path` (the same value JDBC/ODBC clients use). Statements wait
// server-side up to 30s and are then polled until they leave the
// PENDING/RUNNING states.

use crate::drivers::{Row, Scalar, SourceDriver};
use crate::models::DatasourceConfig;
use crate::sql::Dialect;
use crate::utils::{WeiserError, WeiserResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: usize = 60;

pub struct DatabricksDriver {
    name: String,
    http_client: Client,
    base_url: String,
    token: String,
    warehouse_id: String,
    catalog: Option<String>,
    schema: Option<String>,
}

impl DatabricksDriver {
    pub fn new(config: &DatasourceConfig) -> WeiserResult<Self> {
        let host = config.host.as_deref().ok_or_else(|| {
            WeiserError::connection(&config.name, "databricks datasource requires 'host'")
        })?;
        let token = config.access_token.as_deref().ok_or_else(|| {
            WeiserError::connection(&config.name, "databricks datasource requires 'access_token'")
        })?;
        let http_path = config.http_path.as_deref().ok_or_else(|| {
            WeiserError::connection(&config.name, "databricks datasource requires 'http_path'")
        })?;
        let warehouse_id = http_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                WeiserError::connection(&config.name, "cannot derive warehouse id from http_path")
            })?
            .to_string();

        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WeiserError::connection(&config.name, e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            http_client,
            base_url,
            token: token.to_string(),
            warehouse_id,
            catalog: config.catalog.clone(),
            schema: config.schema_name.clone(),
        })
    }

    async fn submit(&self, sql: &str) -> WeiserResult<Value> {
        let mut body = json!({
            "statement": sql,
            "warehouse_id": self.warehouse_id,
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
        });
        if let Some(catalog) = &self.catalog {
            body["catalog"] = json!(catalog);
        }
        if let Some(schema) = &self.schema {
            body["schema"] = json!(schema);
        }

        let mut payload: Value = self
            .http_client
            .post(format!("{}/api/2.0/sql/statements", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| WeiserError::connection(&self.name, e.to_string()))?
            .json()
            .await
            .map_err(|e| WeiserError::query(&self.name, e.to_string(), sql))?;

        for _ in 0..MAX_POLLS {
            match payload["status"]["state"].as_str() {
                Some("SUCCEEDED") => return Ok(payload),
                Some("PENDING") | Some("RUNNING") => {
                    let statement_id = payload["statement_id"].as_str().ok_or_else(|| {
                        WeiserError::query(&self.name, "pending statement without id", sql)
                    })?;
                    tokio::time::sleep(POLL_INTERVAL).await;
                    payload = self
                        .http_client
                        .get(format!(
                            "{}/api/2.0/sql/statements/{}",
                            self.base_url, statement_id
                        ))
                        .bearer_auth(&self.token)
                        .send()
                        .await
                        .map_err(|e| WeiserError::connection(&self.name, e.to_string()))?
                        .json()
                        .await
                        .map_err(|e| WeiserError::query(&self.name, e.to_string(), sql))?;
                },
                Some(other) => {
                    let message = payload["status"]["error"]["message"]
                        .as_str()
                        .unwrap_or(other);
                    return Err(WeiserError::query(&self.name, message, sql));
                },
                None => {
                    let message = payload["message"].as_str().unwrap_or("malformed response");
                    return Err(WeiserError::query(&self.name, message, sql));
                },
            }
        }

        Err(WeiserError::query(&self.name, "statement polling timed out", sql))
    }
}

#[async_trait]
impl SourceDriver for DatabricksDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Databricks
    }

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>> {
        let payload = self.submit(sql).await?;
        parse_result(&self.name, &payload, sql)
    }
}

/// Decode a SUCCEEDED statement payload: column types from
/// `manifest.schema.columns`, rows of nullable strings in
/// `result.data_array`.
fn parse_result(name: &str, payload: &Value, sql: &str) -> WeiserResult<Vec<Row>> {
    let columns = payload["manifest"]["schema"]["columns"]
        .as_array()
        .ok_or_else(|| WeiserError::query(name, "response missing schema columns", sql))?;
    let types: Vec<String> = columns
        .iter()
        .map(|c| c["type_name"].as_str().unwrap_or("STRING").to_ascii_uppercase())
        .collect();

    let empty = Vec::new();
    let data = payload["result"]["data_array"].as_array().unwrap_or(&empty);

    let mut rows = Vec::with_capacity(data.len());
    for raw_row in data {
        let cells = raw_row
            .as_array()
            .ok_or_else(|| WeiserError::query(name, "malformed data row", sql))?;
        let mut row = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            let type_name = types.get(i).map(String::as_str).unwrap_or("STRING");
            row.push(decode_cell(cell, type_name));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn decode_cell(cell: &Value, type_name: &str) -> Scalar {
    let text = match cell.as_str() {
        Some(s) => s,
        None => return Scalar::Null,
    };

    match type_name {
        "BYTE" | "SHORT" | "INT" | "LONG" => text
            .parse::<i64>()
            .map_or_else(|_| Scalar::Text(text.to_string()), Scalar::Int),
        "FLOAT" | "DOUBLE" | "DECIMAL" => text
            .parse::<f64>()
            .map_or_else(|_| Scalar::Text(text.to_string()), Scalar::Float),
        "BOOLEAN" => match text {
            "true" => Scalar::Bool(true),
            "false" => Scalar::Bool(false),
            _ => Scalar::Text(text.to_string()),
        },
        "TIMESTAMP" | "DATE" => Scalar::Text(text.to_string())
            .as_timestamp()
            .map_or_else(|| Scalar::Text(text.to_string()), Scalar::Timestamp),
        _ => Scalar::Text(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_succeeded_result() {
        let payload = json!({
            "status": {"state": "SUCCEEDED"},
            "manifest": {"schema": {"columns": [
                {"name": "tenant_id", "type_name": "INT"},
                {"name": "count(1)", "type_name": "LONG"}
            ]}},
            "result": {"data_array": [["1", "2"], ["2", "1"]]}
        });
        let rows = parse_result("dbx", &payload, "select 1").unwrap();
        assert_eq!(rows[0], vec![Scalar::Int(1), Scalar::Int(2)]);
        assert_eq!(rows[1], vec![Scalar::Int(2), Scalar::Int(1)]);
    }

    #[test]
    fn test_null_cells_and_empty_result() {
        let payload = json!({
            "manifest": {"schema": {"columns": [{"name": "v", "type_name": "DOUBLE"}]}},
            "result": {"data_array": [[null]]}
        });
        let rows = parse_result("dbx", &payload, "select 1").unwrap();
        assert_eq!(rows[0][0], Scalar::Null);

        let empty = json!({
            "manifest": {"schema": {"columns": []}}
        });
        assert!(parse_result("dbx", &empty, "select 1").unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_cell() {
        match decode_cell(&json!("2025-06-01T00:00:00"), "TIMESTAMP") {
            Scalar::Timestamp(ts) => {
                assert_eq!(ts.format("%Y-%m-%d").to_string(), "2025-06-01")
            },
            other => panic!("expected timestamp, got {:?}", other),
        }
    }
}
