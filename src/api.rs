//! Query HTTP API
//!
//! Three read endpoints over the directional views:
//! - `GET /transactions` pages by chain position
//! - `GET /transactions/value` pages by value
//! - `GET /transactions/count` counts rows for an address

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::query::{count_sql, list_sql, parse_filter, parse_list_query, AddressRole, ListOrdering, QueryParamError};
use crate::store::{StoreError, StoredRow, ViewStore};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Shared handler state
pub type SharedStore = Arc<dyn ViewStore>;

/// Errors a request can end with
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    BadRequest(#[from] QueryParamError),

    #[error("No transactions found")]
    NotFound,

    #[error("Storage query failed: {0}")]
    Storage(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Storage(e) => {
                error!(error = %e, "Storage query failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Body of the count endpoint
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
    pub address: String,
    pub address_type: AddressRole,
}

/// Build the API router over a store
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/transactions", get(list_by_position))
        .route("/transactions/value", get(list_by_value))
        .route("/transactions/count", get(count))
        .with_state(store)
}

async fn list_by_position(
    State(store): State<SharedStore>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<StoredRow>>, ApiError> {
    list(store.as_ref(), &params, ListOrdering::ChainPosition).await
}

async fn list_by_value(
    State(store): State<SharedStore>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<StoredRow>>, ApiError> {
    list(store.as_ref(), &params, ListOrdering::Value).await
}

async fn list(
    store: &dyn ViewStore,
    params: &HashMap<String, String>,
    ordering: ListOrdering,
) -> Result<Json<Vec<StoredRow>>, ApiError> {
    let query = parse_list_query(params)?;
    let rows = store.fetch_rows(list_sql(&query, ordering)).await?;

    info!(
        address = %query.filter.address,
        role = %query.filter.role,
        page = query.page,
        rows = rows.len(),
        "Listed transactions"
    );

    if rows.is_empty() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(rows))
}

async fn count(
    State(store): State<SharedStore>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CountResponse>, ApiError> {
    let filter = parse_filter(&params)?;
    let count = store.fetch_count(count_sql(&filter)).await?;

    Ok(Json(CountResponse {
        count,
        address: filter.address,
        address_type: filter.role,
    }))
}
