// SPDX-License-Identifier: MIT
//! Library error type.
use thiserror::Error;

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query `{name}` failed: {source}")]
    Query {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("unknown query `{0}`")]
    UnknownQuery(String),

    #[error("job `{job}` check failed: {message}")]
    Job { job: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for MonitorError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl MonitorError {
    /// Short, low-cardinality label used as a metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connect(_) => "connect",
            Self::Query { .. } => "query",
            Self::UnknownQuery(_) => "unknown_query",
            Self::Job { .. } => "job",
            Self::Io(_) => "io",
        }
    }
}
