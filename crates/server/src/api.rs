use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use quarry_columnar::export::{
    row_to_json, to_csv, to_ipc_stream, to_json_rows, IpcChunks, ARROW_STREAM_CONTENT_TYPE,
};
use quarry_columnar::ColumnarTable;
use quarry_common::CatalogConfig;
use quarry_error::{QuarryError, Result};
use quarry_runtime::FederationEngine;
use serde::Deserialize;
use serde_json::{json, Value};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<FederationEngine>,
    pub catalog_path: Arc<PathBuf>,
    /// Results above this many rows are streamed in batches of this size.
    pub stream_batch_rows: usize,
}

pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .merge(create_query_router(state.clone()))
        .merge(create_metrics_router(state.clone()))
        .merge(create_admin_router(state))
}

pub fn create_query_router(state: ApiState) -> Router {
    Router::new()
        .route("/query", get(query_get).post(query_post))
        .route("/tables", get(list_tables))
        .with_state(state)
}

pub fn create_metrics_router(state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(list_metrics))
        .route("/metrics/{name}", get(metric_data))
        .with_state(state)
}

pub fn create_admin_router(state: ApiState) -> Router {
    Router::new()
        .route("/admin/refresh", post(refresh_catalog))
        .with_state(state)
}

/// `QuarryError` rendered as its JSON payload with the mapped status.
pub struct ApiError(QuarryError);

impl From<QuarryError> for ApiError {
    fn from(err: QuarryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            self.0.to_json(),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Result encoding for `/query`; Arrow unless `format=json` is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Arrow,
    Json,
}

impl OutputFormat {
    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(|f| f.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("arrow") => Ok(Self::Arrow),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(QuarryError::validation(format!(
                "unsupported format '{}'",
                other
            ))
            .with_hint("Use format=arrow or format=json")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    sql: Option<String>,
    format: Option<String>,
}

async fn query_get(
    State(state): State<ApiState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Response> {
    let format = OutputFormat::parse(params.format.as_deref())?;
    let sql = params.sql.unwrap_or_default();
    run_query(&state, &sql, format).await
}

async fn query_post(
    State(state): State<ApiState>,
    Query(params): Query<QueryParams>,
    body: String,
) -> ApiResult<Response> {
    let format = OutputFormat::parse(params.format.as_deref())?;
    run_query(&state, &body, format).await
}

async fn run_query(state: &ApiState, sql: &str, format: OutputFormat) -> ApiResult<Response> {
    if sql.trim().is_empty() {
        return Err(QuarryError::validation("query text is empty")
            .with_hint("Pass the SQL as the 'sql' parameter or as the POST body")
            .into());
    }
    let table = state.engine.execute_query(sql).await?;
    Ok(encode_table(table, format, state.stream_batch_rows)?)
}

fn encode_table(
    table: Arc<ColumnarTable>,
    format: OutputFormat,
    batch_rows: usize,
) -> Result<Response> {
    let batch_rows = batch_rows.max(1);
    let streamed = table.row_count() > batch_rows;
    let response = match (format, streamed) {
        (OutputFormat::Arrow, false) => (
            [(header::CONTENT_TYPE, ARROW_STREAM_CONTENT_TYPE)],
            to_ipc_stream(&table)?,
        )
            .into_response(),
        (OutputFormat::Arrow, true) => {
            let chunks = IpcChunks::new(table, batch_rows).map(|chunk| chunk.map(Bytes::from));
            (
                [(header::CONTENT_TYPE, ARROW_STREAM_CONTENT_TYPE)],
                Body::from_stream(futures::stream::iter(chunks)),
            )
                .into_response()
        }
        (OutputFormat::Json, false) => Json(json!({
            "data": to_json_rows(&table),
            "rowCount": table.row_count(),
        }))
        .into_response(),
        (OutputFormat::Json, true) => (
            [(header::CONTENT_TYPE, "application/json")],
            Body::from_stream(futures::stream::iter(json_chunks(table, batch_rows))),
        )
            .into_response(),
    };
    Ok(response)
}

/// Serializes `{"data": [...], "rowCount": n}` one batch of rows per chunk.
fn json_chunks(
    table: Arc<ColumnarTable>,
    batch_rows: usize,
) -> impl Iterator<Item = Result<Bytes>> + Send + 'static {
    let total = table.row_count();
    let head: Result<Bytes> = Ok(Bytes::from_static(b"{\"data\":["));
    let tail: Result<Bytes> = Ok(Bytes::from(format!("],\"rowCount\":{}}}", total)));
    let body = (0..total).step_by(batch_rows).map(move |start| -> Result<Bytes> {
        let end = (start + batch_rows).min(total);
        let mut buf = Vec::new();
        for row in start..end {
            if row > 0 {
                buf.push(b',');
            }
            serde_json::to_writer(&mut buf, &Value::Object(row_to_json(&table, row)))
                .map_err(|e| QuarryError::internal(format!("JSON encoding failed: {}", e)))?;
        }
        Ok(Bytes::from(buf))
    });
    std::iter::once(head).chain(body).chain(std::iter::once(tail))
}

#[derive(Debug, Deserialize)]
struct MetricParams {
    filter: Option<String>,
}

async fn metric_data(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<MetricParams>,
) -> ApiResult<Response> {
    let table = state
        .engine
        .metric_data(&name, params.filter.as_deref())
        .await?;
    if table.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let csv = to_csv(&table)?;
    Ok(([(header::CONTENT_TYPE, "text/csv")], csv).into_response())
}

async fn list_metrics(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.engine.registry().metric_names())
}

async fn list_tables(State(state): State<ApiState>) -> Json<Vec<Value>> {
    let registry = state.engine.registry();
    let tables = registry
        .table_names()
        .iter()
        .filter_map(|name| registry.get_table(name))
        .map(|table| {
            json!({
                "name": table.name,
                "primaryKeys": table.primary_keys,
                "fields": table.fields().collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(tables)
}

async fn refresh_catalog(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let path = state.catalog_path.clone();
    let catalog = tokio::task::spawn_blocking(move || CatalogConfig::from_file(path.as_path()))
        .await
        .map_err(|e| QuarryError::internal(format!("catalog reload task failed: {}", e)))??;
    state.engine.refresh(catalog).await?;
    Ok(Json(json!({
        "status": "ok",
        "tables": state.engine.registry().table_names(),
    })))
}
