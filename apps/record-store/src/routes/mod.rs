use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use record_log::client::{CountResponse, WriteLineRequest, WriteLineResponse};
use record_log::{LogIdentity, RecordIndex, StoreError, WindowPage};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use crate::metrics;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(export_metrics))
        .route("/api/files/jsonl", get(read_window))
        .route("/api/files/jsonl/count", get(count_records))
        .route("/api/files/jsonl/line", axum::routing::put(write_line))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn export_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::export_prometheus(),
    )
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub path: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct LineQuery {
    pub path: String,
    pub index: RecordIndex,
}

async fn read_window(
    State(state): State<AppState>,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> ApiResult<WindowPage> {
    let Query(query) = query.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let path = LogIdentity::new(query.path);
    let limit = state.limit(query.limit);
    let result = state.store().fetch_window(&path, query.offset, limit).await;
    let page = observed("window", result)?;
    debug!(path = %path, offset = query.offset, limit, total = page.total, "served window");
    Ok(Json(page))
}

async fn count_records(
    State(state): State<AppState>,
    query: Result<Query<PathQuery>, QueryRejection>,
) -> ApiResult<CountResponse> {
    let Query(query) = query.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let path = LogIdentity::new(query.path);
    let total = observed("count", state.store().count(&path).await)?;
    Ok(Json(CountResponse { total }))
}

async fn write_line(
    State(state): State<AppState>,
    query: Result<Query<LineQuery>, QueryRejection>,
    body: Result<Json<WriteLineRequest>, JsonRejection>,
) -> ApiResult<WriteLineResponse> {
    let Query(query) = query.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let Json(body) = body.map_err(|err| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(err.body_text())
        }
    })?;
    if let Err(err) = serde_json::from_str::<serde_json::Value>(&body.content) {
        metrics::observe("line", StatusCode::BAD_REQUEST.as_u16());
        return Err(ApiError::BadRequest(format!("content is not valid JSON: {err}")));
    }
    let path = LogIdentity::new(query.path);
    let result = state
        .store()
        .write_line(&path, query.index, body.content.trim())
        .await;
    observed("line", result)?;
    debug!(path = %path, index = query.index, "replaced record");
    Ok(Json(WriteLineResponse { success: true }))
}

/// Records the outcome of a store call and maps failures onto API errors.
fn observed<T>(route: &str, result: Result<T, StoreError>) -> Result<T, ApiError> {
    match result {
        Ok(value) => {
            metrics::observe(route, StatusCode::OK.as_u16());
            Ok(value)
        }
        Err(err) => {
            let err = ApiError::from(err);
            metrics::observe(route, err.status().as_u16());
            Err(err)
        }
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath(_)
            | StoreError::InvalidContent(_)
            | StoreError::MalformedWindow(_) => ApiError::BadRequest(err.to_string()),
            StoreError::LogNotFound(path) => ApiError::NotFound(format!("File not found: {path}")),
            StoreError::IndexOutOfRange { .. } | StoreError::Conflict { .. } => {
                ApiError::Conflict(err.to_string())
            }
            other => {
                error!(error = %other, "record store failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", Some(msg)),
            ApiError::NotFound(msg) => ("not_found", Some(msg)),
            ApiError::Conflict(msg) => ("conflict", Some(msg)),
            ApiError::PayloadTooLarge => ("payload_too_large", None),
            ApiError::Internal(msg) => ("internal", Some(msg)),
        };
        (status, Json(ApiErrorBody { error, message })).into_response()
    }
}
