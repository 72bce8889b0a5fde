// SPDX-License-Identifier: MIT
//! Agent settings.
//!
//! Layering, lowest to highest precedence: built-in defaults, an optional TOML file,
//! `DBMON__*` environment variables (double underscore separates sections, e.g.
//! `DBMON__DATABASE__URL`), then overrides applied by the binary from its CLI flags.
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{MonitorError, Result};
use crate::telemetry::TelemetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default = "default_queries")]
    pub queries: Vec<QuerySpec>,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

/// Values given on the command line. They win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub endpoint: Option<String>,
}

/// Connection settings.
///
/// Statements run through the `sqlx` `Any` driver, which rejects a whole row when
/// one column has a type it cannot map (PostgreSQL `name`, `numeric`, `timestamp`,
/// `uuid`, ...). Cast such columns to text or a plain number in the SQL.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// sqlx connection URL (`postgres://`, `mysql://`, `sqlite:`).
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// SQL returning the session user as its first column, e.g.
    /// `SELECT current_user::text`. When unset the user embedded in the URL is
    /// reported.
    #[serde(default)]
    pub user_query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Filesystem path whose mount is reported by `app.disk.usage`.
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

/// A named statement executed on every cycle.
///
/// Result columns must decode as integers, floats, booleans or text; see
/// [`DatabaseSettings`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    pub sql: String,
    /// Publish the first column of the first row as `app.db.query.value`.
    #[serde(default)]
    pub record_value: bool,
}

/// Autosys job checks.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_job_command")]
    pub command: String,
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Settings {
    /// Load settings from defaults, an optional file, the environment and
    /// command-line overrides, then validate the result.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::layered(builder, environment(), overrides)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("database.max_connections", default_max_connections() as i64)?
            .set_default(
                "database.connect_timeout_secs",
                default_connect_timeout_secs() as i64,
            )?
            .set_default(
                "monitor.poll_interval_secs",
                default_poll_interval_secs() as i64,
            )?
            .set_default("monitor.disk_path", default_disk_path())?)
    }

    fn layered(
        builder: ConfigBuilder<DefaultState>,
        env: Environment,
        overrides: &Overrides,
    ) -> Result<Self> {
        let settings: Settings = builder
            .add_source(env)
            .set_override_option("database.url", overrides.database_url.clone())?
            .set_override_option("telemetry.endpoint", overrides.endpoint.clone())?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string. Used by tests and embedded configurations.
    pub fn from_toml(source: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(MonitorError::Config("database.url must not be empty".into()));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(MonitorError::Config(
                "monitor.poll_interval_secs must be greater than zero".into(),
            ));
        }
        let mut seen = HashSet::new();
        for query in &self.queries {
            if query.name.trim().is_empty() {
                return Err(MonitorError::Config("query names must not be empty".into()));
            }
            if !seen.insert(query.name.as_str()) {
                return Err(MonitorError::Config(format!(
                    "duplicate query name `{}`",
                    query.name
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_secs)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            disk_path: default_disk_path(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_job_command(),
            names: Vec::new(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("DBMON")
        .separator("__")
        .try_parsing(true)
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_job_command() -> String {
    "autorep".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_queries() -> Vec<QuerySpec> {
    vec![QuerySpec {
        name: "heartbeat".to_string(),
        sql: "SELECT 1".to_string(),
        record_value: false,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let settings = Settings::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"
            "#,
        )
        .expect("settings");

        assert_eq!(settings.monitor.poll_interval_secs, 10);
        assert_eq!(settings.monitor.disk_path, "/");
        assert_eq!(settings.database.max_connections, 5);
        assert_eq!(settings.queries, default_queries());
        assert!(!settings.jobs.enabled);
        assert_eq!(settings.jobs.command, "autorep");
        assert_eq!(settings.http.bind, "0.0.0.0:5000");
    }

    #[test]
    fn full_file_round_trips() {
        let settings = Settings::from_toml(
            r#"
            [telemetry]
            service_name = "sybase_app"
            metrics_interval_secs = 10

            [database]
            url = "postgres://monitor:secret@db:5432/app"
            user_query = "SELECT current_user::text"

            [monitor]
            poll_interval_secs = 30

            [[queries]]
            name = "active_connections"
            sql = "SELECT COUNT(*) FROM pg_stat_activity WHERE state = 'active'"
            record_value = true

            [[queries]]
            name = "top_rows"
            sql = "SELECT * FROM orders LIMIT 10"

            [jobs]
            enabled = true
            names = ["Job_A_load", "Job_B_extract"]

            [http]
            enabled = true
            bind = "127.0.0.1:8080"
            "#,
        )
        .expect("settings");

        assert_eq!(settings.telemetry.service_name, "sybase_app");
        assert_eq!(settings.telemetry.metrics_interval_secs, 10);
        assert_eq!(settings.poll_interval(), Duration::from_secs(30));
        assert_eq!(settings.queries.len(), 2);
        assert!(settings.queries[0].record_value);
        assert!(!settings.queries[1].record_value);
        assert_eq!(settings.jobs.names, vec!["Job_A_load", "Job_B_extract"]);
        assert!(settings.http.enabled);
    }

    #[test]
    fn duplicate_query_names_are_rejected() {
        let err = Settings::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"

            [[queries]]
            name = "count"
            sql = "SELECT 1"

            [[queries]]
            name = "count"
            sql = "SELECT 2"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate query name `count`"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Settings::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"

            [monitor]
            poll_interval_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn missing_database_section_is_an_error() {
        assert!(Settings::from_toml("[monitor]\npoll_interval_secs = 5\n").is_err());
    }

    #[test]
    fn example_file_parses() {
        let settings = Settings::from_toml(include_str!("../dbmon.example.toml"))
            .expect("example settings");
        assert_eq!(
            settings.database.user_query.as_deref(),
            Some("SELECT current_user::text")
        );
        assert_eq!(settings.queries.len(), 2);
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn cli_overrides_stand_alone() {
        let overrides = Overrides {
            database_url: Some("postgres://monitor@db/app".into()),
            endpoint: Some("http://collector:4318".into()),
        };
        let settings = Settings::layered(Settings::defaults().unwrap(), env(&[]), &overrides)
            .expect("settings from overrides only");

        assert_eq!(settings.database.url, "postgres://monitor@db/app");
        assert_eq!(settings.telemetry.endpoint, "http://collector:4318");
        assert_eq!(settings.monitor.poll_interval_secs, 10);
    }

    #[test]
    fn missing_url_without_override_is_an_error() {
        let err = Settings::layered(
            Settings::defaults().unwrap(),
            env(&[]),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("database.url"), "{err}");
    }

    #[test]
    fn layers_apply_in_order() {
        let file = File::from_str(
            r#"
            [database]
            url = "sqlite::memory:"

            [monitor]
            poll_interval_secs = 30
            disk_path = "/data"
            "#,
            config::FileFormat::Toml,
        );
        let builder = Settings::defaults().unwrap().add_source(file);
        let vars = env(&[
            ("DBMON__MONITOR__POLL_INTERVAL_SECS", "60"),
            ("DBMON__DATABASE__URL", "mysql://env@db/app"),
        ]);
        let overrides = Overrides {
            database_url: Some("postgres://cli@db/app".into()),
            ..Overrides::default()
        };
        let settings = Settings::layered(builder, vars, &overrides).expect("settings");

        assert_eq!(settings.monitor.poll_interval_secs, 60);
        assert_eq!(settings.monitor.disk_path, "/data");
        assert_eq!(settings.database.url, "postgres://cli@db/app");
    }
}
