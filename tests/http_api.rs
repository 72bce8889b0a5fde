// SPDX-License-Identifier: MIT
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dbmon::agent::Monitor;
use dbmon::config::Settings;
use dbmon::db::SqlDatabase;
use http_body_util::BodyExt;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

const SETTINGS: &str = r#"
[database]
url = "sqlite::memory:"
max_connections = 1

[[queries]]
name = "two"
sql = "SELECT 2 AS n"
record_value = true

[[queries]]
name = "broken"
sql = "SELECT * FROM no_such_table"
"#;

async fn app() -> Router {
    let settings = Settings::from_toml(SETTINGS).expect("settings");
    let db = SqlDatabase::connect(&settings.database)
        .await
        .expect("sqlite pool");
    let monitor = Monitor::new(
        &settings,
        Arc::new(db),
        &opentelemetry::global::meter("http-test"),
    );
    dbmon::http::router(Arc::new(monitor))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_reports_database() {
    let (status, body) = get(app().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["db"], "up");
    assert_eq!(body["db.system"], "sqlite");
}

#[tokio::test]
async fn lists_configured_queries() {
    let (status, body) = get(app().await, "/queries").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["two", "broken"]));
}

#[tokio::test]
async fn runs_named_query() {
    let (status, body) = get(app().await, "/queries/two").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"], json!(["n"]));
    assert_eq!(body["rows"], json!([[2]]));
}

#[tokio::test]
async fn unknown_query_is_404() {
    let (status, body) = get(app().await, "/queries/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown query `missing`");
}

#[tokio::test]
async fn failing_query_is_500() {
    let (status, body) = get(app().await, "/queries/broken").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().expect("error message");
    assert!(message.starts_with("query `broken` failed"), "{message}");
}

#[tokio::test]
async fn status_exposes_snapshot() {
    let (status, body) = get(app().await, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["system"]["memory_percent"].is_number());
    assert_eq!(body["db_up"], false);
}

#[tokio::test]
async fn query_span_nests_under_request_span() {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("info"))
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("http-test")));
    let _guard = tracing::subscriber::set_default(subscriber);

    let (status, _) = get(app().await, "/queries/two").await;
    assert_eq!(status, StatusCode::OK);

    let spans = exporter.get_finished_spans().expect("spans");
    let request = spans
        .iter()
        .find(|s| s.name == "request")
        .expect("request span");
    let query = spans
        .iter()
        .find(|s| s.name == "db.query two")
        .expect("query span");
    assert_eq!(query.parent_span_id, request.span_context.span_id());
}
