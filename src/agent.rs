// SPDX-License-Identifier: MIT
//! The monitor loop.
//!
//! One cycle: refresh host readings, probe the database, log in and run every
//! configured query, then check scheduler jobs. Failures are logged and counted;
//! nothing is retried before the next tick.
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use opentelemetry::metrics::Meter;
use tokio::time::MissedTickBehavior;
use tracing::field::Empty;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{QuerySpec, Settings};
use crate::db::{Database, QueryResult};
use crate::error::{MonitorError, Result};
use crate::instrument::InstrumentedDb;
use crate::jobs::{AutorepCommand, JobMonitor, JobSource};
use crate::metrics::{LiveReadings, MonitorMetrics};
use crate::system::{SystemSampler, SystemSnapshot};

/// Outcome of one [`Monitor::run_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub db_up: bool,
    pub queries_ok: usize,
    pub queries_failed: usize,
    /// Queries not attempted because the database was unreachable.
    pub queries_skipped: usize,
    pub jobs_checked: usize,
}

pub struct Monitor {
    db: InstrumentedDb,
    metrics: MonitorMetrics,
    readings: Arc<LiveReadings>,
    sampler: Arc<Mutex<SystemSampler>>,
    queries: Vec<QuerySpec>,
    job_names: Vec<String>,
    jobs: Option<JobMonitor>,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(settings: &Settings, db: Arc<dyn Database>, meter: &Meter) -> Self {
        let readings = Arc::new(LiveReadings::new(
            db.system(),
            settings.monitor.disk_path.clone(),
        ));
        let metrics = MonitorMetrics::new(meter, readings.clone());
        let job_names = if settings.jobs.enabled {
            settings.jobs.names.clone()
        } else {
            Vec::new()
        };

        let mut monitor = Self {
            db: InstrumentedDb::new(db, metrics.clone(), readings.clone()),
            metrics,
            readings,
            sampler: Arc::new(Mutex::new(SystemSampler::new(&settings.monitor.disk_path))),
            queries: settings.queries.clone(),
            job_names,
            jobs: None,
            poll_interval: settings.poll_interval(),
        };
        if settings.jobs.enabled {
            monitor = monitor.with_job_source(Arc::new(AutorepCommand::new(
                settings.jobs.command.clone(),
            )));
        }
        monitor
    }

    /// Replace where job reports come from. Has no effect when jobs are disabled.
    pub fn with_job_source(mut self, source: Arc<dyn JobSource>) -> Self {
        if !self.job_names.is_empty() {
            self.jobs = Some(JobMonitor::new(
                source,
                self.job_names.clone(),
                self.metrics.clone(),
            ));
        }
        self
    }

    pub fn readings(&self) -> &Arc<LiveReadings> {
        &self.readings
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(|q| q.name.as_str())
    }

    pub fn db_system(&self) -> &str {
        self.db.system()
    }

    pub async fn probe(&self) -> bool {
        self.db.probe().await
    }

    /// Take a host/process sample and publish it to the gauges.
    ///
    /// Sampling walks every mount, so it runs on the blocking pool. When it fails
    /// the previous snapshot stays published.
    pub async fn refresh_readings(&self) -> SystemSnapshot {
        let sampler = self.sampler.clone();
        let sampled = tokio::task::spawn_blocking(move || {
            sampler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .refresh()
        })
        .await;
        match sampled {
            Ok(snapshot) => {
                self.readings.set_snapshot(snapshot);
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "host sampling failed");
                self.readings.snapshot()
            }
        }
    }

    /// Run a configured query by name outside the regular cycle.
    pub async fn run_query(&self, name: &str) -> Result<QueryResult> {
        let spec = self
            .queries
            .iter()
            .find(|q| q.name == name)
            .ok_or_else(|| MonitorError::UnknownQuery(name.to_string()))?;
        self.db.run(spec).await
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let span = info_span!(
            "monitor.cycle",
            db.system = %self.db.system(),
            db.up = Empty,
            queries.failed = Empty,
        );
        let current = span.clone();

        async move {
            let snapshot = self.refresh_readings().await;
            debug!(
                cpu = snapshot.cpu_percent,
                memory = snapshot.memory_percent,
                "host readings refreshed"
            );

            let mut summary = CycleSummary {
                db_up: self.db.probe().await,
                ..CycleSummary::default()
            };
            current.record("db.up", summary.db_up);

            if summary.db_up {
                if let Err(e) = self.db.login().await {
                    warn!(error = %e, "continuing without a resolved user");
                }
                for spec in &self.queries {
                    match self.db.run(spec).await {
                        Ok(_) => summary.queries_ok += 1,
                        Err(_) => summary.queries_failed += 1,
                    }
                }
            } else {
                summary.queries_skipped = self.queries.len();
            }
            current.record("queries.failed", summary.queries_failed as u64);

            if let Some(jobs) = &self.jobs {
                summary.jobs_checked = jobs.check_all().await;
            }
            summary
        }
        .instrument(span)
        .await
    }

    /// Run cycles every poll interval until `shutdown` resolves.
    ///
    /// A cycle already in progress is allowed to finish.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.poll_interval.as_secs(),
            queries = self.queries.len(),
            jobs = self.job_names.len(),
            "monitor loop started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("monitor loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.run_cycle().await;
                    info!(
                        db_up = summary.db_up,
                        ok = summary.queries_ok,
                        failed = summary.queries_failed,
                        skipped = summary.queries_skipped,
                        jobs = summary.jobs_checked,
                        "cycle complete"
                    );
                }
            }
        }
    }
}
