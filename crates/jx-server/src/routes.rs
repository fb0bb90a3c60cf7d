//! HTTP endpoints
//!
//! - `POST /query` runs a JX query and returns the formatted result
//! - `POST /insert/:fact` shreds one document or an array of documents
//! - `GET /health`
//! - `GET /metrics` in Prometheus text format

use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jx_duck::{Database, ExecutionError};
use jx_ir::ErrorKind;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub metrics: Metrics,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    kind: &'static str,
    error: String,
}

#[derive(Debug, Serialize)]
struct InsertResponse {
    fact: String,
    guids: Vec<String>,
}

pub struct ApiError(ExecutionError);

impl From<ExecutionError> for ApiError {
    fn from(e: ExecutionError) -> Self {
        ApiError(e)
    }
}

fn status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ExecuteError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::TransactionError => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let body = ErrorResponse {
            kind: kind.as_str(),
            error: self.0.to_string(),
        };
        (status(kind), Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/insert/:fact", post(insert))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

fn outcome<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "ok"
    } else {
        "error"
    }
}

async fn query(State(state): State<AppState>, Json(jx): Json<Value>) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let result = state.db.query(&jx).await;
    state.metrics.query_seconds.observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .requests
        .with_label_values(&["query", outcome(&result)])
        .inc();
    match result {
        Ok(value) => Ok(Json(value)),
        Err(e) => {
            warn!(kind = e.kind().as_str(), error = %e, "Query failed");
            Err(e.into())
        }
    }
}

async fn insert(
    State(state): State<AppState>,
    Path(fact): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<InsertResponse>, ApiError> {
    let docs = match body {
        Value::Array(docs) => docs,
        doc => vec![doc],
    };
    let result = state.db.insert(&fact, &docs).await;
    state
        .metrics
        .requests
        .with_label_values(&["insert", outcome(&result)])
        .inc();
    let guids = result.map_err(|e| {
        warn!(fact = %fact, kind = e.kind().as_str(), error = %e, "Insert failed");
        ApiError(e)
    })?;
    state
        .metrics
        .documents
        .with_label_values(&[fact.as_str()])
        .inc_by(guids.len() as u64);
    info!(fact = %fact, docs = guids.len(), "Insert complete");
    Ok(Json(InsertResponse { fact, guids }))
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> AppState {
        AppState {
            db: Database::in_memory().unwrap(),
            metrics: Metrics::new().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_then_query() {
        let state = state();
        let Json(inserted) = insert(
            State(state.clone()),
            Path("t".to_string()),
            Json(json!([{"a": 1, "b": "x"}, {"a": 2, "b": "y"}])),
        )
        .await
        .unwrap_or_else(|e| panic!("{}", e.0));
        assert_eq!(inserted.guids.len(), 2);

        let Json(result) = query(
            State(state.clone()),
            Json(json!({"from": "t", "select": "a", "sort": "a"})),
        )
        .await
        .unwrap_or_else(|e| panic!("{}", e.0));
        assert_eq!(result["data"], json!([{"a": 1}, {"a": 2}]));

        let text = state.metrics.render().unwrap();
        assert!(text.contains(r#"jx_documents_inserted_total{fact="t"} 2"#));
    }

    #[tokio::test]
    async fn test_errors_map_to_status() {
        let state = state();
        let Err(e) = query(State(state), Json(json!({"from": "missing"}))).await else {
            panic!("query on an unknown fact succeeded");
        };
        let response = e.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_by_kind() {
        assert_eq!(status(ErrorKind::ParseError), StatusCode::BAD_REQUEST);
        assert_eq!(status(ErrorKind::TransactionError), StatusCode::CONFLICT);
        assert_eq!(status(ErrorKind::ExecuteError), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
