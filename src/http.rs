// SPDX-License-Identifier: MIT
//! Small HTTP API over the monitor.
//!
//! Request spans come from `TraceLayer` at INFO, the default filter level, so
//! `db.query` spans started by a handler nest under the HTTP span that triggered
//! them.
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::agent::Monitor;
use crate::error::MonitorError;

pub fn router(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/queries", get(list_queries))
        .route("/queries/{name}", get(run_query))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(monitor)
}

/// Serve [`router`] on `bind` until `shutdown` resolves.
pub async fn serve<F>(monitor: Arc<Monitor>, bind: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "http api listening");
    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(monitor): State<Arc<Monitor>>) -> Json<serde_json::Value> {
    let db = if monitor.probe().await { "up" } else { "down" };
    Json(json!({ "status": "up", "db": db, "db.system": monitor.db_system() }))
}

async fn status(State(monitor): State<Arc<Monitor>>) -> Json<serde_json::Value> {
    let readings = monitor.readings();
    Json(json!({
        "system": readings.snapshot(),
        "db_up": readings.db_up(),
    }))
}

async fn list_queries(State(monitor): State<Arc<Monitor>>) -> Json<Vec<String>> {
    Json(monitor.query_names().map(str::to_string).collect())
}

async fn run_query(
    State(monitor): State<Arc<Monitor>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let result = monitor.run_query(&name).await?;
    Ok(Json(result).into_response())
}

struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            MonitorError::UnknownQuery(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
