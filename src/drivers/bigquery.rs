// BigQuery driver over the jobs.query REST endpoint.
//
// Runs with a pre-acquired bearer token: either `access_token` in the
// connection record or the contents of the file at `credentials_path`.
// Acquiring tokens (service-account signing, gcloud flows) is outside the
// engine per the driver contract.

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

pub struct BigQueryDriver {
    name: String,
    http_client: Client,
    project_id: String,
    dataset_id: Option<String>,
    location: Option<String>,
    token: String,
}

impl BigQueryDriver {
    pub fn new(config: &DatasourceConfig) -> WeiserResult<Self> {
        let project_id = config.project_id.clone().ok_or_else(|| {
            WeiserError::connection(&config.name, "bigquery datasource requires 'project_id'")
        })?;

        let token = match (&config.access_token, &config.credentials_path) {
            (Some(token), _) => token.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|e| {
                    WeiserError::connection(
                        &config.name,
                        format!("cannot read credentials file {}: {}", path, e),
                    )
                })?,
            (None, None) => {
                return Err(WeiserError::connection(
                    &config.name,
                    "bigquery datasource requires 'access_token' or 'credentials_path'",
                ));
            },
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WeiserError::connection(&config.name, e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            http_client,
            project_id,
            dataset_id: config.dataset_id.clone(),
            location: config.location.clone(),
            token,
        })
    }

    async fn run_query(&self, sql: &str) -> WeiserResult<Value> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": 30_000,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }
        if let Some(dataset) = &self.dataset_id {
            body["defaultDataset"] =
                json!({ "projectId": self.project_id, "datasetId": dataset });
        }

        let mut payload: Value = self
            .http_client
            .post(format!(
                "https://bigquery.googleapis.com/bigquery/v2/projects/{}/queries",
                self.project_id
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| WeiserError::connection(&self.name, e.to_string()))?
            .json()
            .await
            .map_err(|e| WeiserError::query(&self.name, e.to_string(), sql))?;

        if let Some(message) = payload["error"]["message"].as_str() {
            return Err(WeiserError::query(&self.name, message, sql));
        }

        let mut polls = 0;
        while !payload["jobComplete"].as_bool().unwrap_or(true) {
            if polls >= MAX_POLLS {
                return Err(WeiserError::query(&self.name, "job polling timed out", sql));
            }
            polls += 1;

            let job_id = payload["jobReference"]["jobId"].as_str().ok_or_else(|| {
                WeiserError::query(&self.name, "incomplete job without jobReference", sql)
            })?;
            let mut request = self
                .http_client
                .get(format!(
                    "https://bigquery.googleapis.com/bigquery/v2/projects/{}/queries/{}",
                    self.project_id, job_id
                ))
                .bearer_auth(&self.token);
            if let Some(location) = &self.location {
                request = request.query(&[("location", location)]);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
            payload = request
                .send()
                .await
                .map_err(|e| WeiserError::connection(&self.name, e.to_string()))?
                .json()
                .await
                .map_err(|e| WeiserError::query(&self.name, e.to_string(), sql))?;

            if let Some(message) = payload["error"]["message"].as_str() {
                return Err(WeiserError::query(&self.name, message, sql));
            }
        }

        Ok(payload)
    }
}

#[async_trait]
impl SourceDriver for BigQueryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    async fn execute(&self, sql: &str) -> WeiserResult<Vec<Row>> {
        let payload = self.run_query(sql).await?;
        parse_query_response(&self.name, &payload, sql)
    }
}

/// Decode a jobs.query response: field types in `schema.fields`, rows as
/// `rows[].f[].v` nullable strings.
fn parse_query_response(name: &str, payload: &Value, sql: &str) -> WeiserResult<Vec<Row>> {
    let fields = payload["schema"]["fields"]
        .as_array()
        .ok_or_else(|| WeiserError::query(name, "response missing schema fields", sql))?;
    let types: Vec<String> = fields
        .iter()
        .map(|f| f["type"].as_str().unwrap_or("STRING").to_ascii_uppercase())
        .collect();

    let empty = Vec::new();
    let data = payload["rows"].as_array().unwrap_or(&empty);

    let mut rows = Vec::with_capacity(data.len());
    for raw_row in data {
        let cells = raw_row["f"]
            .as_array()
            .ok_or_else(|| WeiserError::query(name, "malformed row", sql))?;
        let mut row = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            let type_name = types.get(i).map(String::as_str).unwrap_or("STRING");
            row.push(decode_cell(&cell["v"], type_name));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn decode_cell(value: &Value, type_name: &str) -> Scalar {
    let text = match value.as_str() {
        Some(s) => s,
        None => return Scalar::Null,
    };

    match type_name {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map_or_else(|_| Scalar::Text(text.to_string()), Scalar::Int),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .parse::<f64>()
            .map_or_else(|_| Scalar::Text(text.to_string()), Scalar::Float),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Scalar::Bool(true),
            "false" => Scalar::Bool(false),
            _ => Scalar::Text(text.to_string()),
        },
        // Timestamps arrive as epoch seconds with a fractional part.
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|epoch| {
                chrono::DateTime::from_timestamp(
                    epoch.trunc() as i64,
                    (epoch.fract() * 1e9) as u32,
                )
            })
            .map_or_else(|| Scalar::Text(text.to_string()), |dt| {
                Scalar::Timestamp(dt.naive_utc())
            }),
        "DATE" | "DATETIME" => Scalar::Text(text.to_string())
            .as_timestamp()
            .map_or_else(|| Scalar::Text(text.to_string()), Scalar::Timestamp),
        _ => Scalar::Text(text.to_string()),
    }
}
