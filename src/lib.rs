// SPDX-License-Identifier: MIT
//! Database telemetry agent.
//!
//! `dbmon` connects to a SQL database, runs a configured set of queries on a fixed
//! interval and exports what it sees over OTLP: a span per query, duration/row/failure
//! metrics, host and process gauges, database reachability, and optional Autosys job
//! status. Spans are produced through `tracing` and bridged into OpenTelemetry.
//!
//! Modules, bottom-up:
//! * [`telemetry`] – providers, exporters and the `tracing` subscriber.
//! * [`config`] – layered [`config::Settings`].
//! * [`db`] – the [`db::Database`] seam and its `sqlx` implementation.
//! * [`system`] – host/process sampling.
//! * [`metrics`] – instruments and the shared [`metrics::LiveReadings`].
//! * [`instrument`] – traced, metered database calls.
//! * [`jobs`] – Autosys report parsing and checks.
//! * [`agent`] – the monitor loop.
//! * [`http`] – health/status/query endpoints.
//!
//! # Feature Flags
//! * `console-log` (default) – compact console formatter (file/line/thread id).
//! * `otlp-log` – OTLP log exporter; tracing events are bridged into logs.
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use dbmon::{agent::Monitor, config::{Overrides, Settings}, db::SqlDatabase};
//! use dbmon::telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None, &Overrides::default())?;
//!     let handle = init_telemetry(settings.telemetry.clone())?;
//!     let db = SqlDatabase::connect(&settings.database).await?;
//!     let monitor = Monitor::new(&settings, Arc::new(db), &handle.meter());
//!     monitor.run(async { tokio::signal::ctrl_c().await.ok(); }).await;
//!     handle.shutdown()?;
//!     Ok(())
//! }
//! ```
pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod instrument;
pub mod jobs;
pub mod metrics;
pub mod system;
pub mod telemetry;

pub use error::{MonitorError, Result};

#[cfg(test)]
mod tests {
    use super::telemetry::{init_telemetry, TelemetryConfig};

    #[tokio::test]
    async fn telemetry_init_works() {
        let handle = init_telemetry(TelemetryConfig::default()).expect("telemetry init");
        let _meter = handle.meter();
        tracing::info!("telemetry smoke test");
        handle.shutdown().expect("shutdown");
    }
}
