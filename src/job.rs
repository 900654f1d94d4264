// src/job.rs
//! Job Controller: fire-and-forget launch of the external enrichment job.
//!
//! Two decoupled halves: this launcher returns right after starting the job,
//! and completion is only ever observed through the run marker (see `feed`).
//! There is no mutual exclusion between concurrent `start_job` calls.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{FeedSection, JobSection};
use crate::marker::RunMarker;

pub const ENV_JOB_MARKER: &str = "PULSE_RUNNING_MARKER";
pub const ENV_JOB_FEED_PATH: &str = "PULSE_FEED_PATH";

/// Wire shape of `StartJob`: `{status: "success"|"started"|"error", pid?, message?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StartOutcome {
    /// The local job-execution endpoint ran the job, or accepted it (`202`) and runs it in the background.
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The job was spawned in the background.
    Started {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    Error { message: String },
}

impl StartOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, StartOutcome::Error { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            StartOutcome::Success { .. } => "success",
            StartOutcome::Started { .. } => "started",
            StartOutcome::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
}

/// How the controller starts the external job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub endpoint: Option<String>,
    pub endpoint_timeout: Duration,
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl JobSpec {
    pub fn from_config(job: &JobSection) -> Self {
        Self {
            endpoint: job.endpoint.clone(),
            endpoint_timeout: job.endpoint_timeout(),
            program: job.program.clone(),
            args: job.args.clone(),
            workdir: job.workdir.clone(),
        }
    }
}

pub struct JobController {
    spec: JobSpec,
    artifact: PathBuf,
    marker: Arc<dyn RunMarker>,
    http: reqwest::Client,
    state: Mutex<JobState>,
}

impl JobController {
    pub fn new(spec: JobSpec, artifact: impl Into<PathBuf>, marker: Arc<dyn RunMarker>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("pulse-job-controller/0.1")
            .timeout(spec.endpoint_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "job", error = %e, "http client build failed, endpoint calls have no timeout");
                reqwest::Client::new()
            });
        Self {
            spec,
            artifact: artifact.into(),
            marker,
            http,
            state: Mutex::new(JobState::Idle),
        }
    }

    pub fn from_config(job: &JobSection, feed: &FeedSection, marker: Arc<dyn RunMarker>) -> Self {
        Self::new(JobSpec::from_config(job), feed.artifact_path(), marker)
    }

    /// Start the enrichment job. Never blocks on job completion.
    pub async fn start_job(&self) -> StartOutcome {
        self.set_state(JobState::Starting);

        let (outcome, next) = match self.try_endpoint().await {
            Some(accepted) => accepted,
            None => {
                let outcome = self.launch_detached();
                let next = match &outcome {
                    StartOutcome::Error { .. } => JobState::Failed,
                    _ => JobState::Running,
                };
                (outcome, next)
            }
        };

        self.set_state(next);
        counter!("job_start_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Last known state reconciled with the marker. A crashed job that never
    /// removed its marker stays `Running` (no timeout).
    pub fn state(&self) -> JobState {
        let mut g = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *g == JobState::Running && !self.marker.is_running() {
            *g = JobState::Completed;
        }
        *g
    }

    fn set_state(&self, next: JobState) {
        match self.state.lock() {
            Ok(mut g) => *g = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Synchronous path. `None` means "not reachable / not usable, fall back to spawn".
    ///
    /// The marker is written before the call so a job that finishes quickly
    /// can clear it. `202 Accepted` means the endpoint runs the job in the
    /// background and the marker stays; any other 2xx means the run is done.
    async fn try_endpoint(&self) -> Option<(StartOutcome, JobState)> {
        let url = self.spec.endpoint.as_deref()?;
        if let Err(e) = self.marker.begin() {
            warn!(target: "job", error = %e, "could not write run marker before endpoint call");
        }
        let res = self.http.post(url).send().await;
        match res {
            Ok(resp) if resp.status() == StatusCode::ACCEPTED => {
                let text = resp.text().await.unwrap_or_default();
                info!(target: "job", %url, marker = %self.marker.describe(), "job endpoint started run in background");
                Some((success(text), JobState::Running))
            }
            Ok(resp) if resp.status().is_success() => {
                let text = resp.text().await.unwrap_or_default();
                if let Err(e) = self.marker.end() {
                    warn!(target: "job", error = %e, "could not clear run marker after synchronous run");
                }
                info!(target: "job", %url, "job endpoint completed run");
                Some((success(text), JobState::Completed))
            }
            Ok(resp) => {
                warn!(target: "job", %url, status = %resp.status(), "job endpoint refused run, falling back to spawn");
                None
            }
            Err(e) => {
                warn!(target: "job", %url, error = %e, "job endpoint unreachable, falling back to spawn");
                None
            }
        }
    }

    fn launch_detached(&self) -> StartOutcome {
        if let Err(e) = remove_stale_artifact(&self.artifact) {
            warn!(target: "job", path = %self.artifact.display(), error = %e, "could not remove stale artifact");
            return StartOutcome::Error {
                message: format!("failed to remove stale artifact: {e}"),
            };
        }

        if let Err(e) = self.marker.begin() {
            return StartOutcome::Error {
                message: format!("failed to write run marker: {e}"),
            };
        }

        match self.spawn() {
            Ok(pid) => {
                info!(
                    target: "job",
                    pid = ?pid,
                    program = %self.spec.program,
                    marker = %self.marker.describe(),
                    "enrichment job spawned"
                );
                StartOutcome::Started { pid }
            }
            Err(e) => {
                // Nothing will ever clear the marker for a job that never started.
                if let Err(end_err) = self.marker.end() {
                    warn!(target: "job", error = %end_err, "could not roll back run marker");
                }
                warn!(target: "job", program = %self.spec.program, error = %e, "failed to spawn enrichment job");
                StartOutcome::Error {
                    message: format!("failed to start job: {e}"),
                }
            }
        }
    }

    fn spawn(&self) -> io::Result<Option<u32>> {
        let out = self.artifact.display().to_string();
        let marker = self.marker.describe();
        let args = self
            .spec
            .args
            .iter()
            .map(|a| a.replace("{out}", &out).replace("{marker}", &marker));

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(args)
            .env(ENV_JOB_MARKER, &marker)
            .env(ENV_JOB_FEED_PATH, &out)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(false);
        if let Some(dir) = &self.spec.workdir {
            cmd.current_dir(dir);
        }

        // The child handle is dropped on purpose: tokio reaps it in the background.
        let child = cmd.spawn()?;
        Ok(child.id())
    }
}

fn success(text: String) -> StartOutcome {
    StartOutcome::Success {
        message: Some(text).filter(|t| !t.trim().is_empty()),
    }
}

fn remove_stale_artifact(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(target: "job", path = %path.display(), "removed stale feed artifact");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_wire_shape() {
        let started = serde_json::to_value(StartOutcome::Started { pid: Some(42) }).unwrap();
        assert_eq!(started, serde_json::json!({"status": "started", "pid": 42}));

        let err = serde_json::to_value(StartOutcome::Error {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(err, serde_json::json!({"status": "error", "message": "boom"}));

        let ok = serde_json::to_value(StartOutcome::Success { message: None }).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "success"}));
    }
}
