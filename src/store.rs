//! Analytical Store Client
//!
//! Talks to ClickHouse over its HTTP interface. Queries are sent as the POST
//! body with `FORMAT JSON` appended, and rows come back under `data`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default ClickHouse HTTP endpoint, for local development only
pub const DEFAULT_STORAGE_URL: &str = "http://localhost:8123";

pub const DEFAULT_DATABASE: &str = "default";

/// Per-query timeout in milliseconds
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10000;

/// One stored row, passed through to API callers as-is
pub type StoredRow = Map<String, Value>;

/// Errors that can occur querying the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response shape: {0}")]
    Decode(String),
}

/// Connection settings for the store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STORAGE_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            user: None,
            password: None,
            timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

/// Read access to the directional views
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Run a row-returning query
    async fn fetch_rows(&self, sql: String) -> Result<Vec<StoredRow>, StoreError>;

    /// Run a query whose single row carries a `count` column
    async fn fetch_count(&self, sql: String) -> Result<u64, StoreError>;
}

#[derive(Debug, Deserialize)]
struct JsonResponse {
    #[serde(default)]
    data: Vec<StoredRow>,
}

/// ClickHouse HTTP client
pub struct ClickHouseStore {
    http: reqwest::Client,
    config: StoreConfig,
}

impl ClickHouseStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn query(&self, sql: &str) -> Result<JsonResponse, StoreError> {
        debug!(sql, "Store query");

        let mut request = self
            .http
            .post(&self.config.url)
            .query(&[
                ("database", self.config.database.as_str()),
                ("output_format_json_quote_64bit_integers", "1"),
            ])
            .body(format!("{} FORMAT JSON", sql));
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        response
            .json::<JsonResponse>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ViewStore for ClickHouseStore {
    async fn fetch_rows(&self, sql: String) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self.query(&sql).await?.data)
    }

    async fn fetch_count(&self, sql: String) -> Result<u64, StoreError> {
        let response = self.query(&sql).await?;
        let row = response
            .data
            .first()
            .ok_or_else(|| StoreError::Decode("count query returned no rows".to_string()))?;
        count_from_row(row)
    }
}

/// Read the `count` column, which arrives quoted for 64-bit integers
pub fn count_from_row(row: &StoredRow) -> Result<u64, StoreError> {
    match row.get("count") {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| StoreError::Decode(format!("count is not an integer: {}", s))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| StoreError::Decode(format!("count is not an integer: {}", n))),
        Some(other) => Err(StoreError::Decode(format!("count has unexpected type: {}", other))),
        None => Err(StoreError::Decode("count column missing".to_string())),
    }
}
