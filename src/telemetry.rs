// SPDX-License-Identifier: MIT
//! Telemetry initialization (traces and metrics always, optional console logs & OTLP logs).
//!
//! Wraps the OpenTelemetry + `tracing` setup shared by the agent and its HTTP surface:
//!
//! * [`TelemetryConfig`] – endpoint, resource metadata, metric export interval, log level.
//! * [`init_telemetry`] – builds providers, installs the global tracer/meter and the subscriber.
//! * [`TelemetryHandle`] – hands out meters and performs explicit synchronous shutdown/flush.
//!
//! Feature flags (Cargo features) influence behavior:
//!
//! * `console-log` – add a compact console formatting layer (on by default).
//! * `otlp-log` – enable OTLP log exporter + tracing bridge (converts tracing events to logs).
//!
//! # Example
//! ```no_run
//! use dbmon::telemetry::{init_telemetry, TelemetryConfig};
//! fn main() -> anyhow::Result<()> {
//!     let handle = init_telemetry(TelemetryConfig::default())?;
//!     let _meter = handle.meter();
//!     // ... application logic ...
//!     handle.shutdown()?; // ensure final spans and metrics are exported
//!     Ok(())
//! }
//! ```
//!
//! # Shutdown
//! Call [`TelemetryHandle::shutdown`] before exiting the Tokio runtime to flush any remaining
//! batches. The meter provider performs one last collection on shutdown, so the final gauge
//! readings of a run are exported too.
//!
//! # Threading Model
//! The batch span processor and the periodic metric reader each run on their own worker
//! thread (using the blocking HTTP client). Constructing telemetry inside a Tokio context is
//! all that is required.
use std::time::Duration;

use anyhow::Result;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::{global, KeyValue};
#[cfg(feature = "otlp-log")]
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
#[cfg(feature = "otlp-log")]
use opentelemetry_otlp::LogExporter;
use opentelemetry_otlp::{MetricExporter, Protocol, SpanExporter, WithExportConfig};
#[cfg(feature = "otlp-log")]
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde::Deserialize;
use tracing_opentelemetry::OpenTelemetryLayer;
#[cfg(feature = "console-log")]
use tracing_subscriber::fmt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Instrumentation scope name used for the tracer and meter.
pub const SCOPE_NAME: &str = "dbmon";

/// Configuration used when initializing telemetry.
///
/// Values are sourced from environment variables if available:
/// * `OTEL_EXPORTER_OTLP_ENDPOINT` – base endpoint (e.g. `http://localhost:4318`).
/// * `OTEL_SERVICE_NAME` – service name resource attribute.
/// * `RUST_ENV` – deployment environment (added as `deployment.environment`).
///
/// The same fields can be set from the `[telemetry]` table of the settings file; explicit
/// settings win over the environment defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Base OTLP endpoint (without per-signal suffix). Example: `http://localhost:4318`.
    pub endpoint: String,
    /// Service name reported in resource attributes (`service.name`).
    pub service_name: String,
    /// Service version reported in resource attributes (`service.version`).
    pub service_version: String,
    /// Deployment environment reported as `deployment.environment`.
    pub environment: String,
    /// Interval between metric collections/exports.
    pub metrics_interval_secs: u64,
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4318".to_string()),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "dbmon".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".into()),
            metrics_interval_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Endpoint for one signal, e.g. `signal_endpoint("traces")`.
    pub fn signal_endpoint(&self, signal: &str) -> String {
        format!("{}/v1/{signal}", self.endpoint.trim_end_matches('/'))
    }

    /// Resource shared by every provider.
    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new("service.version", self.service_version.clone()),
                KeyValue::new("deployment.environment", self.environment.clone()),
            ])
            .build()
    }
}

/// Handle allowing explicit synchronous shutdown of telemetry providers.
///
/// Dropping the handle without calling [`TelemetryHandle::shutdown`] may result in
/// losing final batches, depending on exporter internals.
pub struct TelemetryHandle {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    #[cfg(feature = "otlp-log")]
    logger_provider: SdkLoggerProvider,
}

impl TelemetryHandle {
    /// Meter bound to this handle's provider.
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(SCOPE_NAME)
    }

    /// Flush and shutdown all configured telemetry providers.
    ///
    /// Every provider is shut down even if an earlier one fails. If one or more providers
    /// report an error, a combined `anyhow::Error` naming each failing component is returned.
    pub fn shutdown(self) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(e) = self.meter_provider.shutdown() {
            errs.push(format!("meter: {e}"));
        }
        if let Err(e) = self.tracer_provider.shutdown() {
            errs.push(format!("tracer: {e}"));
        }
        #[cfg(feature = "otlp-log")]
        if let Err(e) = self.logger_provider.shutdown() {
            errs.push(format!("logger: {e}"));
        }
        if errs.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(errs.join(", "))
        }
    }
}

/// Initialize tracing, metrics (and optionally logging) telemetry for the agent.
///
/// Installs global tracer and meter providers and configures a subscriber registry
/// composed of layers (console formatting, OTLP log bridge, OpenTelemetry span layer)
/// depending on enabled Cargo features.
///
/// # Errors
/// Returns an error if any exporter builder fails (e.g. invalid endpoint URL) or if a
/// global subscriber was already installed.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<TelemetryHandle> {
    let resource = cfg.resource();

    // Build exporters (HTTP binary OTLP)
    let span_exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(cfg.signal_endpoint("traces"))
        .build()?;

    let metric_exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(cfg.signal_endpoint("metrics"))
        .build()?;

    #[cfg(feature = "otlp-log")]
    let log_exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(cfg.signal_endpoint("logs"))
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_resource(resource.clone())
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let reader = PeriodicReader::builder(metric_exporter)
        .with_interval(Duration::from_secs(cfg.metrics_interval_secs.max(1)))
        .build();
    let meter_provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource.clone())
        .build();
    global::set_meter_provider(meter_provider.clone());

    #[cfg(feature = "otlp-log")]
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource.clone())
        .build();

    #[cfg(feature = "otlp-log")]
    let bridge_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    let otel_trace_layer = OpenTelemetryLayer::new(global::tracer(SCOPE_NAME));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    // Console formatting: plain compact single-line output.
    #[cfg(feature = "console-log")]
    let fmt_layer_plain = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    #[cfg(all(feature = "console-log", feature = "otlp-log"))]
    Registry::default()
        .with(filter)
        .with(fmt_layer_plain)
        .with(bridge_layer)
        .with(otel_trace_layer)
        .try_init()?;

    #[cfg(all(feature = "console-log", not(feature = "otlp-log")))]
    Registry::default()
        .with(filter)
        .with(fmt_layer_plain)
        .with(otel_trace_layer)
        .try_init()?;

    #[cfg(all(not(feature = "console-log"), feature = "otlp-log"))]
    Registry::default()
        .with(filter)
        .with(bridge_layer)
        .with(otel_trace_layer)
        .try_init()?;

    #[cfg(all(not(feature = "console-log"), not(feature = "otlp-log")))]
    Registry::default()
        .with(filter)
        .with(otel_trace_layer)
        .try_init()?;

    tracing::info!(
        service.name = %cfg.service_name,
        endpoint = %cfg.endpoint,
        metrics.interval_secs = cfg.metrics_interval_secs,
        "telemetry initialized"
    );

    #[cfg(feature = "otlp-log")]
    return Ok(TelemetryHandle {
        tracer_provider,
        meter_provider,
        logger_provider,
    });

    #[cfg(not(feature = "otlp-log"))]
    return Ok(TelemetryHandle {
        tracer_provider,
        meter_provider,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_endpoint_trims_trailing_slash() {
        let cfg = TelemetryConfig {
            endpoint: "http://collector:4318/".into(),
            ..TelemetryConfig::default()
        };
        assert_eq!(cfg.signal_endpoint("traces"), "http://collector:4318/v1/traces");
        assert_eq!(cfg.signal_endpoint("metrics"), "http://collector:4318/v1/metrics");
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: TelemetryConfig =
            serde_json::from_str(r#"{"service_name":"ase-prod"}"#).expect("deserialize");
        assert_eq!(cfg.service_name, "ase-prod");
        assert_eq!(cfg.metrics_interval_secs, 5);
        assert_eq!(cfg.service_version, env!("CARGO_PKG_VERSION"));
    }
}
