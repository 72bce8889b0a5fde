// SPDX-License-Identifier: MIT
//! Traced and metered database calls.
//!
//! Every statement runs inside a `db.query` span carrying the semantic-convention
//! `db.*` attributes; the same call records the duration/row/failure instruments in
//! [`MonitorMetrics`], so a slow histogram bucket can be followed to its span.
use std::sync::Arc;
use std::time::Instant;

use tracing::field::Empty;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::QuerySpec;
use crate::db::{Database, QueryResult};
use crate::error::{MonitorError, Result};
use crate::metrics::{LiveReadings, MonitorMetrics};

#[derive(Clone)]
pub struct InstrumentedDb {
    db: Arc<dyn Database>,
    metrics: MonitorMetrics,
    readings: Arc<LiveReadings>,
}

impl InstrumentedDb {
    pub fn new(db: Arc<dyn Database>, metrics: MonitorMetrics, readings: Arc<LiveReadings>) -> Self {
        Self {
            db,
            metrics,
            readings,
        }
    }

    pub fn system(&self) -> &str {
        self.db.system()
    }

    /// Check reachability and publish it to `app.db.connection.status`.
    pub async fn probe(&self) -> bool {
        let up = match self.db.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(db.system = %self.db.system(), error = %e, "database unreachable");
                false
            }
        };
        self.readings.set_db_up(up);
        up
    }

    /// Resolve the session user and count the login.
    pub async fn login(&self) -> Result<String> {
        let span = info_span!(
            "db.connect",
            db.system = %self.db.system(),
            db.user = Empty,
        );
        async {
            let user = self.db.current_user().await.inspect_err(|e| {
                error!(error = %e, "failed to resolve database user");
            })?;
            tracing::Span::current().record("db.user", user.as_str());
            info!(user_id = %user, "connected to database");
            self.metrics.record_login(&user);
            Ok::<_, MonitorError>(user)
        }
        .instrument(span)
        .await
    }

    /// Run one configured statement.
    pub async fn run(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let span = info_span!(
            "db.query",
            otel.name = %format!("db.query {}", spec.name),
            otel.kind = "client",
            db.system = %self.db.system(),
            db.statement = %spec.sql,
            db.query.name = %spec.name,
            db.row_count = Empty,
            duration_ms = Empty,
            error.type = Empty,
            otel.status_code = Empty,
        );
        let current = span.clone();

        async move {
            let started = Instant::now();
            let outcome = self.db.fetch(&spec.sql).await;
            let elapsed = started.elapsed();
            current.record("duration_ms", elapsed.as_secs_f64() * 1000.0);

            match outcome {
                Ok(result) => {
                    let rows = result.row_count();
                    current.record("db.row_count", rows);
                    current.record("otel.status_code", "OK");
                    self.metrics.record_query(&spec.name, elapsed, Some(rows));
                    if spec.record_value {
                        match result.scalar() {
                            Some(value) => self.metrics.record_query_value(&spec.name, value),
                            None => warn!(query = %spec.name, "value query returned no number"),
                        }
                    }
                    info!(
                        query = %spec.name,
                        rows,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "query executed"
                    );
                    Ok(result)
                }
                Err(e) => {
                    let e = relabel(e, &spec.name);
                    current.record("error.type", e.kind());
                    current.record("otel.status_code", "ERROR");
                    self.metrics.record_query(&spec.name, elapsed, None);
                    self.metrics.record_query_failure(&spec.name, e.kind());
                    error!(query = %spec.name, error = %e, "failed to execute query");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Errors coming back from [`Database::fetch`] name the statement; report the
/// configured query name instead.
fn relabel(err: MonitorError, name: &str) -> MonitorError {
    match err {
        MonitorError::Query { source, .. } => MonitorError::Query {
            name: name.to_string(),
            source,
        },
        other => other,
    }
}
