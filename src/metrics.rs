// SPDX-License-Identifier: MIT
//! Instruments published by the agent.
//!
//! Synchronous instruments (counters, histograms, the query value gauge) are recorded
//! inline by the code that observes the event. Observable gauges read [`LiveReadings`],
//! which the monitor loop refreshes once per cycle; callbacks never touch the host or
//! the database themselves, so a collection never blocks on I/O.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, ObservableGauge};
use opentelemetry::KeyValue;

use crate::system::SystemSnapshot;

const MIB: f64 = 1024.0 * 1024.0;

/// Latest readings shared between the monitor loop, gauge callbacks and the HTTP API.
#[derive(Debug)]
pub struct LiveReadings {
    snapshot: RwLock<SystemSnapshot>,
    db_up: AtomicBool,
    db_system: String,
    disk_path: String,
}

impl LiveReadings {
    pub fn new(db_system: impl Into<String>, disk_path: impl Into<String>) -> Self {
        Self {
            snapshot: RwLock::new(SystemSnapshot::default()),
            db_up: AtomicBool::new(false),
            db_system: db_system.into(),
            disk_path: disk_path.into(),
        }
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        *self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_snapshot(&self, snapshot: SystemSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn db_up(&self) -> bool {
        self.db_up.load(Ordering::Relaxed)
    }

    pub fn set_db_up(&self, up: bool) {
        self.db_up.store(up, Ordering::Relaxed);
    }

    pub fn db_system(&self) -> &str {
        &self.db_system
    }
}

#[derive(Clone)]
pub struct MonitorMetrics {
    query_duration: Histogram<f64>,
    queries_total: Counter<u64>,
    query_failures: Counter<u64>,
    query_rows: Histogram<u64>,
    query_value: Gauge<f64>,
    user_logins: Counter<u64>,
    job_status: Counter<u64>,
    job_duration: Histogram<f64>,
    // Held so the callbacks stay registered for the lifetime of the metrics.
    _gauges: Arc<Vec<ObservableGauge<f64>>>,
    _status_gauges: Arc<Vec<ObservableGauge<u64>>>,
}

impl MonitorMetrics {
    pub fn new(meter: &Meter, readings: Arc<LiveReadings>) -> Self {
        let query_duration = meter
            .f64_histogram("app.db.query.duration")
            .with_description("Time taken to execute a database query")
            .with_unit("s")
            .with_boundaries(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ])
            .build();

        let queries_total = meter
            .u64_counter("app.db.query.count")
            .with_description("Database queries executed")
            .with_unit("{query}")
            .build();

        let query_failures = meter
            .u64_counter("app.db.query.failures")
            .with_description("Database queries that returned an error")
            .with_unit("{error}")
            .build();

        let query_rows = meter
            .u64_histogram("app.db.query.rows")
            .with_description("Rows returned per query")
            .with_unit("{row}")
            .build();

        let query_value = meter
            .f64_gauge("app.db.query.value")
            .with_description("First column of the first row of a value query")
            .with_unit("1")
            .build();

        let user_logins = meter
            .u64_counter("app.db.user.logged_in")
            .with_description("Number of times a user connects to the database")
            .with_unit("{login}")
            .build();

        let job_status = meter
            .u64_counter("autosys.job.status")
            .with_description("Autosys job checks by reported status")
            .with_unit("1")
            .build();

        let job_duration = meter
            .f64_histogram("autosys.job.duration")
            .with_description("Duration of the last Autosys job run")
            .with_unit("ms")
            .build();

        let gauges = vec![
            observe_f64(
                meter,
                "app.cpu.usage",
                "CPU usage of the host",
                "%",
                readings.clone(),
                |r| vec![(r.snapshot().cpu_percent, vec![])],
            ),
            observe_f64(
                meter,
                "app.memory.usage",
                "Memory usage of the host",
                "%",
                readings.clone(),
                |r| vec![(r.snapshot().memory_percent, vec![])],
            ),
            observe_f64(
                meter,
                "app.disk.usage",
                "Disk usage of the monitored mount",
                "%",
                readings.clone(),
                |r| match r.snapshot().disk_percent {
                    Some(p) => vec![(p, vec![KeyValue::new("disk.path", r.disk_path.clone())])],
                    None => vec![],
                },
            ),
            observe_f64(
                meter,
                "process.cpu.usage",
                "CPU usage of the agent process",
                "%",
                readings.clone(),
                |r| vec![(r.snapshot().process_cpu_percent, vec![])],
            ),
            observe_f64(
                meter,
                "process.memory.usage",
                "Memory usage of the agent process",
                "MiBy",
                readings.clone(),
                |r| {
                    let s = r.snapshot();
                    vec![
                        (
                            s.process_rss_bytes as f64 / MIB,
                            vec![KeyValue::new("memory.type", "rss")],
                        ),
                        (
                            s.process_virtual_bytes as f64 / MIB,
                            vec![KeyValue::new("memory.type", "vms")],
                        ),
                    ]
                },
            ),
        ];

        let app_status = meter
            .u64_observable_gauge("app.status")
            .with_description("Application status (1 for up, 0 for down)")
            .with_unit("1")
            .with_callback(|observer| observer.observe(1, &[]))
            .build();

        let db_readings = readings;
        let db_status = meter
            .u64_observable_gauge("app.db.connection.status")
            .with_description("Database connection status (1 for up, 0 for down)")
            .with_unit("1")
            .with_callback(move |observer| {
                observer.observe(
                    db_readings.db_up() as u64,
                    &[KeyValue::new("db.system", db_readings.db_system.clone())],
                )
            })
            .build();

        Self {
            query_duration,
            queries_total,
            query_failures,
            query_rows,
            query_value,
            user_logins,
            job_status,
            job_duration,
            _gauges: Arc::new(gauges),
            _status_gauges: Arc::new(vec![app_status, db_status]),
        }
    }

    /// Record one query execution.
    pub fn record_query(&self, name: &str, duration: Duration, rows: Option<u64>) {
        let success = rows.is_some();
        let attributes = [
            KeyValue::new("db.query.name", name.to_string()),
            KeyValue::new("success", success),
        ];
        self.query_duration
            .record(duration.as_secs_f64(), &attributes);
        self.queries_total.add(1, &attributes);
        if let Some(rows) = rows {
            self.query_rows
                .record(rows, &[KeyValue::new("db.query.name", name.to_string())]);
        }
    }

    pub fn record_query_failure(&self, name: &str, error_type: &str) {
        self.query_failures.add(
            1,
            &[
                KeyValue::new("db.query.name", name.to_string()),
                KeyValue::new("error.type", error_type.to_string()),
            ],
        );
    }

    pub fn record_query_value(&self, name: &str, value: f64) {
        self.query_value
            .record(value, &[KeyValue::new("db.query.name", name.to_string())]);
    }

    pub fn record_login(&self, user_id: &str) {
        self.user_logins
            .add(1, &[KeyValue::new("user_id", user_id.to_string())]);
    }

    pub fn record_job(&self, job: &str, status: &str, duration: Option<Duration>) {
        let attributes = [
            KeyValue::new("job.name", job.to_string()),
            KeyValue::new("job.status", status.to_string()),
        ];
        self.job_status.add(1, &attributes);
        if let Some(duration) = duration {
            self.job_duration
                .record(duration.as_secs_f64() * 1000.0, &attributes);
        }
    }
}

type Observations = Vec<(f64, Vec<KeyValue>)>;

fn observe_f64(
    meter: &Meter,
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    readings: Arc<LiveReadings>,
    read: fn(&LiveReadings) -> Observations,
) -> ObservableGauge<f64> {
    meter
        .f64_observable_gauge(name)
        .with_description(description)
        .with_unit(unit)
        .with_callback(move |observer| {
            for (value, attributes) in read(&readings) {
                observer.observe(value, &attributes);
            }
        })
        .build()
}
