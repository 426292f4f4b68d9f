//! Build job data model and lifecycle state machine.
//!
//! A job moves strictly forward through
//! `Created -> EnvironmentStarting -> Running -> {Succeeded | Failed}`.
//! `Failed` can also be reached from any non-terminal state when
//! provisioning or supervision goes wrong.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::EnvironmentHandle;

/// Opaque, path-safe build identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    /// Wrap an externally supplied id, rejecting anything that could not
    /// have been minted by the allocator (and so is unsafe as a path segment).
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(raw.to_string()))
    }

    pub(crate) const fn from_minted(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// App configuration forwarded verbatim to the builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splash_screen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<BTreeMap<String, serde_json::Value>>,
}

/// Validated inputs of a build submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub source_url: String,
    pub app_name: String,
    pub app_config: AppConfig,
}

/// Why a job ended in [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildFailure {
    #[error("build backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to provision build environment: {0}")]
    Provisioning(String),

    #[error("failed to start build environment: {0}")]
    Start(String),

    #[error("build process exited with code {0}")]
    NonZeroExit(i64),

    #[error("build timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("lost track of build environment: {0}")]
    Supervision(String),
}

/// Lifecycle state of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    EnvironmentStarting,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::EnvironmentStarting => "environment_starting",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    EnvironmentRequested,
    EnvironmentStarted,
    Exited(i64),
    Failed(BuildFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: JobState,
    pub event: JobEvent,
}

/// One build request's full lifecycle record.
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Unique id, also the workspace directory name.
    pub id: BuildId,
    /// Validated submission this job was created from.
    pub request: BuildRequest,
    /// Absolute workspace path, bound into the environment as its output.
    pub workspace: PathBuf,
    /// Durable per-job log file.
    pub log_path: PathBuf,
    /// Current lifecycle state.
    pub state: JobState,
    /// Exit code reported by the environment, once it has exited.
    pub exit_code: Option<i64>,
    /// Why the job failed. Set only in `Failed`.
    pub error: Option<BuildFailure>,
    /// Back-reference for control operations only; cleared after teardown.
    pub environment: Option<EnvironmentHandle>,
    /// Set once a runner has taken the job; it is never run twice.
    pub claimed: bool,
    /// When the job was created.
    pub submitted_at: Instant,
    /// When the job reached a terminal state.
    pub finished_at: Option<Instant>,
}

impl BuildJob {
    pub fn new(id: BuildId, request: BuildRequest, workspace: PathBuf, log_path: PathBuf) -> Self {
        Self {
            id,
            request,
            workspace,
            log_path,
            state: JobState::Created,
            exit_code: None,
            error: None,
            environment: None,
            claimed: false,
            submitted_at: Instant::now(),
            finished_at: None,
        }
    }

    /// Advance the state machine. On error the job is left untouched.
    pub fn apply(&mut self, event: JobEvent) -> Result<JobState, TransitionError> {
        let next = match (self.state, &event) {
            (JobState::Created, JobEvent::EnvironmentRequested) => Some(JobState::EnvironmentStarting),
            (JobState::EnvironmentStarting, JobEvent::EnvironmentStarted) => Some(JobState::Running),
            (JobState::Running, JobEvent::Exited(0)) => Some(JobState::Succeeded),
            (JobState::Running, JobEvent::Exited(_)) => Some(JobState::Failed),
            (state, JobEvent::Failed(_)) if !state.is_terminal() => Some(JobState::Failed),
            _ => None,
        };
        let Some(next) = next else {
            return Err(TransitionError {
                from: self.state,
                event,
            });
        };

        match event {
            JobEvent::Exited(code) => {
                self.exit_code = Some(code);
                if code != 0 {
                    self.error = Some(BuildFailure::NonZeroExit(code));
                }
            }
            JobEvent::Failed(failure) => self.error = Some(failure),
            JobEvent::EnvironmentRequested | JobEvent::EnvironmentStarted => {}
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        Ok(next)
    }
}
