//! PostgREST backend over HTTP.
//!
//! | Builder call        | Request                                                  |
//! |---------------------|----------------------------------------------------------|
//! | `select ... single` | `GET /t?select=..&c=eq.v` + `Accept: ...object+json`     |
//! | `insert`            | `POST /t` + `Prefer: return=representation`              |
//! | `update`            | `PATCH /t?c=eq.v` + `Prefer: return=representation,...` |
//! | `delete`            | `DELETE /t?c=eq.v` + `Prefer: count=exact`               |
//! | `execute_sql`       | `POST /rpc/<function>` with `{"<argument>": sql}`        |

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::ast::{Filter, Row};
use crate::config::RestConfig;
use crate::error::{BridgeError, BridgeResult, ServiceError};
use crate::service::{ServiceResult, TableQuery, TableService, UpdateOutcome};
use crate::transpiler::ToRest;

const OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";
const PREFER: &str = "prefer";

/// A PostgREST client.
#[derive(Debug, Clone)]
pub struct RestService {
    client: reqwest::Client,
    endpoint: String,
    rpc_function: Option<String>,
    rpc_argument: String,
}

impl RestService {
    /// Build a client from configuration. No request is made.
    pub fn new(config: &RestConfig) -> BridgeResult<Self> {
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| BridgeError::Config(e.to_string()))
        };

        let mut headers = HeaderMap::new();
        headers.insert("apikey", header(&config.api_key)?);
        headers.insert(AUTHORIZATION, header(&format!("Bearer {}", config.api_key))?);
        if config.schema != "public" {
            headers.insert("accept-profile", header(&config.schema)?);
            headers.insert("content-profile", header(&config.schema)?);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            rpc_function: config.rpc_function.clone(),
            rpc_argument: config.rpc_argument.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.endpoint, table)
    }

    async fn send(&self, request: RequestBuilder) -> ServiceResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ServiceResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ServiceError::Transport(format!("Invalid response body: {}", e)))
}

impl TableService for RestService {
    async fn select(&self, query: TableQuery) -> ServiceResult<Vec<Row>> {
        tracing::debug!("GET /{}?{}", query.table, query.to_query_string());
        let mut request = self
            .client
            .get(self.table_url(&query.table))
            .query(&query.to_rest());
        if query.single {
            request = request.header(ACCEPT, OBJECT_MEDIA_TYPE);
        }

        let response = self.send(request).await?;
        if query.single {
            let row: Row = decode(response).await?;
            Ok(vec![row])
        } else {
            decode(response).await
        }
    }

    async fn insert(&self, table: &str, values: Row) -> ServiceResult<Option<Row>> {
        tracing::debug!("POST /{}", table);
        let request = self
            .client
            .post(self.table_url(table))
            .header(PREFER, "return=representation")
            .header(ACCEPT, OBJECT_MEDIA_TYPE)
            .json(&values);

        let response = self.send(request).await?;
        let row: Row = decode(response).await?;
        Ok(Some(row))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        values: Row,
    ) -> ServiceResult<UpdateOutcome> {
        tracing::debug!("PATCH /{}?{}", table, filters.to_query_string());
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filters.to_rest())
            .header(PREFER, "return=representation,count=exact")
            .json(&values);

        let response = self.send(request).await?;
        let count = content_range_count(response.headers());
        let rows: Vec<Row> = decode(response).await?;
        Ok(UpdateOutcome { rows, count })
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> ServiceResult<Option<u64>> {
        tracing::debug!("DELETE /{}?{}", table, filters.to_query_string());
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&filters.to_rest())
            .header(PREFER, "count=exact");

        let response = self.send(request).await?;
        Ok(content_range_count(response.headers()))
    }

    async fn execute_sql(&self, sql: &str) -> ServiceResult<Vec<Row>> {
        let Some(function) = &self.rpc_function else {
            return Err(ServiceError::RpcUnavailable);
        };
        tracing::debug!("POST /rpc/{}", function);

        let mut body = serde_json::Map::new();
        body.insert(self.rpc_argument.clone(), Value::String(sql.to_string()));
        let request = self
            .client
            .post(format!("{}/rpc/{}", self.endpoint, function))
            .json(&body);

        let response = match self.send(request).await {
            Ok(response) => response,
            Err(ServiceError::Remote { code, .. }) if is_missing_function(&code) => {
                return Err(ServiceError::RpcUnavailable);
            }
            Err(e) => return Err(e),
        };
        let value: Value = decode(response).await?;
        Ok(rows_from_rpc(value))
    }
}

/// PostgREST error payload.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

fn classify_error(status: StatusCode, body: &str) -> ServiceError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed
        .code
        .unwrap_or_else(|| status.as_u16().to_string());

    // PGRST116 covers both "0 rows" and "more than one row".
    let no_rows = parsed
        .details
        .as_deref()
        .is_none_or(|d| d.contains(" 0 rows"));
    if code == "PGRST116" && no_rows {
        return ServiceError::NoRowsMatched;
    }

    let message = parsed.message.unwrap_or_else(|| body.to_string());
    ServiceError::Remote { code, message }
}

fn is_missing_function(code: &str) -> bool {
    code == "PGRST202" || code == "404"
}

/// The total in `Content-Range: 0-4/5` or `*/0`.
fn content_range_count(headers: &HeaderMap) -> Option<u64> {
    let range = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = range.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Normalise whatever an RPC function returns into rows.
fn rows_from_rpc(value: Value) -> Vec<Row> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => row,
                other => single_column("result", other),
            })
            .collect(),
        Value::Object(row) => vec![row],
        other => vec![single_column("result", other)],
    }
}

fn single_column(name: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(name.to_string(), value);
    row
}
