//! Warehouse execution against BigQuery.
//!
//! [`Warehouse`] is the trait seam; [`BigQueryWarehouse`] calls the
//! synchronous `jobs.query` endpoint with a bounded timeout and decodes the
//! reply against its schema into JSON row objects. The query engine itself
//! is BigQuery's; this module only moves statements and rows.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::credentials::Configuration;
use crate::error::ExecutionError;
use crate::gcp_auth::TokenProvider;
use crate::models::{Row, Rows};

/// The warehouse collaborator: run one read-only statement.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn run(&self, sql: &str) -> Result<Rows, ExecutionError>;
}

pub struct BigQueryWarehouse {
    http: reqwest::Client,
    tokens: TokenProvider,
    project_id: String,
    timeout_secs: u64,
}

impl BigQueryWarehouse {
    pub fn new(configuration: &Configuration, timeout_secs: u64) -> Result<Self, ExecutionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.saturating_add(5)))
            .build()
            .map_err(|e| ExecutionError::from_message(e.to_string()))?;
        let tokens = TokenProvider::new(configuration.warehouse_credential.clone(), timeout_secs)
            .map_err(|e| ExecutionError::from_message(e.to_string()))?;
        Ok(Self {
            http,
            tokens,
            project_id: configuration.warehouse_project_id.clone(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn run(&self, sql: &str) -> Result<Rows, ExecutionError> {
        let token = self
            .tokens
            .bearer_token()
            .await
            .map_err(|e| ExecutionError::from_message(e.to_string()))?;

        let url = format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/queries",
            self.project_id
        );
        let body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": self.timeout_secs * 1000,
        });

        debug!(project = %self.project_id, "submitting warehouse query");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::from_message(e.to_string()))?;

        let status = response.status();
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::from_message(e.to_string()))?;

        if !status.is_success() {
            let message = json
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("BigQuery API error {status}"));
            return Err(ExecutionError::from_message(message));
        }

        if json.get("jobComplete").and_then(|v| v.as_bool()) == Some(false) {
            return Err(ExecutionError::from_message(format!(
                "query did not complete within {}s",
                self.timeout_secs
            )));
        }

        decode_rows(&json)
    }
}

/// Decode a `jobs.query` reply into row objects, in schema column order.
fn decode_rows(json: &serde_json::Value) -> Result<Rows, ExecutionError> {
    let fields = json
        .pointer("/schema/fields")
        .and_then(|f| f.as_array())
        .ok_or_else(|| ExecutionError::from_message("query reply carries no schema"))?;

    let columns: Vec<(String, String)> = fields
        .iter()
        .map(|f| {
            (
                f.get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string(),
                f.get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("STRING")
                    .to_string(),
            )
        })
        .collect();

    let raw_rows = match json.get("rows").and_then(|r| r.as_array()) {
        Some(rows) => rows,
        // Zero-row results omit the rows key entirely.
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::with_capacity(raw_rows.len());
    for raw in raw_rows {
        let cells = raw
            .get("f")
            .and_then(|f| f.as_array())
            .ok_or_else(|| ExecutionError::from_message("malformed row in query reply"))?;

        let mut row = Row::new();
        for (i, (name, column_type)) in columns.iter().enumerate() {
            let cell = cells.get(i).and_then(|c| c.get("v"));
            row.insert(name.clone(), decode_cell(cell, column_type));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// BigQuery returns every scalar as a JSON string; coerce by declared type.
/// Unparseable values stay strings rather than failing the whole result.
fn decode_cell(cell: Option<&serde_json::Value>, column_type: &str) -> serde_json::Value {
    let raw = match cell {
        None | Some(serde_json::Value::Null) => return serde_json::Value::Null,
        Some(serde_json::Value::String(s)) => s.as_str(),
        Some(other) => return other.clone(),
    };

    match column_type {
        "INTEGER" | "INT64" => raw
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(raw)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => raw
            .parse::<f64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(raw)),
        "BOOLEAN" | "BOOL" => match raw {
            "true" => serde_json::Value::from(true),
            "false" => serde_json::Value::from(false),
            _ => serde_json::Value::from(raw),
        },
        _ => serde_json::Value::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(schema: serde_json::Value, rows: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "jobComplete": true,
            "schema": { "fields": schema },
            "rows": rows,
        })
    }

    #[test]
    fn test_decode_typed_columns() {
        let json = reply(
            serde_json::json!([
                { "name": "count", "type": "INTEGER" },
                { "name": "fee", "type": "FLOAT" },
                { "name": "active", "type": "BOOLEAN" },
                { "name": "client", "type": "STRING" },
            ]),
            serde_json::json!([
                { "f": [{ "v": "42" }, { "v": "12.5" }, { "v": "true" }, { "v": "acme" }] }
            ]),
        );

        let rows = decode_rows(&json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["count"], serde_json::json!(42));
        assert_eq!(rows[0]["fee"], serde_json::json!(12.5));
        assert_eq!(rows[0]["active"], serde_json::json!(true));
        assert_eq!(rows[0]["client"], serde_json::json!("acme"));
    }

    #[test]
    fn test_decode_preserves_column_order() {
        let json = reply(
            serde_json::json!([
                { "name": "zeta", "type": "STRING" },
                { "name": "alpha", "type": "STRING" },
            ]),
            serde_json::json!([{ "f": [{ "v": "1" }, { "v": "2" }] }]),
        );

        let rows = decode_rows(&json).unwrap();
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_decode_null_cells() {
        let json = reply(
            serde_json::json!([{ "name": "maybe", "type": "INTEGER" }]),
            serde_json::json!([{ "f": [{ "v": null }] }]),
        );
        let rows = decode_rows(&json).unwrap();
        assert_eq!(rows[0]["maybe"], serde_json::Value::Null);
    }

    #[test]
    fn test_decode_zero_row_result() {
        let json = serde_json::json!({
            "jobComplete": true,
            "schema": { "fields": [{ "name": "count", "type": "INTEGER" }] },
        });
        assert!(decode_rows(&json).unwrap().is_empty());
    }

    #[test]
    fn test_decode_unparseable_number_stays_string() {
        let json = reply(
            serde_json::json!([{ "name": "n", "type": "INTEGER" }]),
            serde_json::json!([{ "f": [{ "v": "not-a-number" }] }]),
        );
        let rows = decode_rows(&json).unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!("not-a-number"));
    }
}
