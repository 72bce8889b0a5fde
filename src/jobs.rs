// SPDX-License-Identifier: MIT
//! Autosys job checks.
//!
//! Each configured name (wildcards such as `Job_A_*` are passed through to `autorep`)
//! is looked up once per cycle. The report is parsed into [`JobReport`]s, every report
//! is counted by status, and the last run's duration is recorded when both timestamps
//! are known.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::process::Command;
use tracing::field::Empty;
use tracing::{debug, error, info, info_span, Instrument};

use crate::error::{MonitorError, Result};
use crate::metrics::MonitorMetrics;

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";
const NEVER: &str = "-----";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
    Running,
    Terminated,
    Inactive,
    OnIce,
    OnHold,
    Activated,
    Starting,
    Queued,
    Restart,
    Pending,
    Unknown(String),
}

impl JobStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "SU" => Self::Success,
            "FA" => Self::Failure,
            "RU" => Self::Running,
            "TE" => Self::Terminated,
            "IN" => Self::Inactive,
            "OI" => Self::OnIce,
            "OH" => Self::OnHold,
            "AC" => Self::Activated,
            "ST" => Self::Starting,
            "QU" => Self::Queued,
            "RE" => Self::Restart,
            "PE" => Self::Pending,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Running => "RUNNING",
            Self::Terminated => "TERMINATED",
            Self::Inactive => "INACTIVE",
            Self::OnIce => "ON_ICE",
            Self::OnHold => "ON_HOLD",
            Self::Activated => "ACTIVATED",
            Self::Starting => "STARTING",
            Self::Queued => "QUEUED",
            Self::Restart => "RESTART",
            Self::Pending => "PENDING",
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub name: String,
    pub status: JobStatus,
    pub last_start: Option<NaiveDateTime>,
    pub last_end: Option<NaiveDateTime>,
}

impl JobReport {
    /// `last_end - last_start`, when the job has a finished run.
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.last_start?, self.last_end?);
        (end - start).to_std().ok()
    }
}

/// Parse `autorep -j` summary output.
///
/// Lines that do not look like a job row (headers, `___` rulers, blanks, error
/// messages) are skipped.
pub fn parse_autorep(output: &str) -> Vec<JobReport> {
    output.lines().filter_map(parse_row).collect()
}

fn parse_row(line: &str) -> Option<JobReport> {
    let mut tokens = line.split_whitespace().peekable();
    let name = *tokens.peek()?;
    if name.starts_with('_') || name == "Job" {
        return None;
    }
    tokens.next();

    let mut timestamp = || -> Option<Option<NaiveDateTime>> {
        let first = tokens.next()?;
        if first == NEVER {
            return Some(None);
        }
        let time = tokens.next()?;
        NaiveDateTime::parse_from_str(&format!("{first} {time}"), TIMESTAMP_FORMAT)
            .ok()
            .map(Some)
    };
    let last_start = timestamp()?;
    let last_end = timestamp()?;
    let code = tokens.next()?;
    if code.len() != 2 {
        return None;
    }

    Some(JobReport {
        name: name.to_string(),
        status: JobStatus::from_code(code),
        last_start,
        last_end,
    })
}

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Raw report text for `job`.
    async fn report(&self, job: &str) -> Result<String>;
}

/// Shells out to `autorep -j <job>`.
pub struct AutorepCommand {
    program: String,
}

impl AutorepCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl JobSource for AutorepCommand {
    async fn report(&self, job: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-j")
            .arg(job)
            .output()
            .await?;
        if !output.status.success() {
            return Err(MonitorError::Job {
                job: job.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct JobMonitor {
    source: Arc<dyn JobSource>,
    names: Vec<String>,
    metrics: MonitorMetrics,
}

impl JobMonitor {
    pub fn new(source: Arc<dyn JobSource>, names: Vec<String>, metrics: MonitorMetrics) -> Self {
        Self {
            source,
            names,
            metrics,
        }
    }

    /// Check every configured job; returns how many reports were recorded.
    pub async fn check_all(&self) -> usize {
        let mut recorded = 0;
        for name in &self.names {
            recorded += self.check(name).await;
        }
        recorded
    }

    async fn check(&self, name: &str) -> usize {
        let span = info_span!(
            "autosys.job",
            job.name = %name,
            job.count = Empty,
            job.status = Empty,
            otel.status_code = Empty,
        );
        let current = span.clone();
        async move {
            match self.source.report(name).await {
                Ok(output) => {
                    let reports = parse_autorep(&output);
                    current.record("job.count", reports.len() as u64);
                    match reports.as_slice() {
                        [] => debug!(job = %name, "no jobs matched"),
                        [only] => {
                            current.record("job.status", only.status.as_str());
                        }
                        _ => {}
                    }
                    for report in &reports {
                        let duration = report.duration();
                        info!(
                            job = %report.name,
                            status = %report.status,
                            duration_ms = duration.map(|d| d.as_millis() as u64),
                            "job checked"
                        );
                        self.metrics
                            .record_job(&report.name, report.status.as_str(), duration);
                    }
                    reports.len()
                }
                Err(e) => {
                    current.record("job.status", "ERROR");
                    current.record("otel.status_code", "ERROR");
                    error!(job = %name, error = %e, "job check failed");
                    self.metrics.record_job(name, "ERROR", None);
                    0
                }
            }
        }
        .instrument(span)
        .await
    }
}
