//! Job lifecycle tracker: the single source of truth for what happened to
//! each build job.
//!
//! Only the tracker mutates job records, always through the state machine
//! in [`crate::job`]. Callers get cloned snapshots.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::backend::EnvironmentHandle;
use crate::job::{BuildId, BuildJob, JobEvent, JobState, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("unknown build {0}")]
    UnknownJob(BuildId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<BuildId, BuildJob>>,
    /// Signalled whenever a job reaches a terminal state.
    finished: Notify,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: BuildJob) {
        debug!(build_id = %job.id, "Tracking new job");
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    pub async fn get(&self, id: &BuildId) -> Option<BuildJob> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Known and not yet terminal.
    pub async fn is_live(&self, id: &str) -> bool {
        let Some(id) = BuildId::parse(id) else {
            return false;
        };
        self.jobs
            .read()
            .await
            .get(&id)
            .is_some_and(|job| !job.state.is_terminal())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Take a `Created` job for execution.
    ///
    /// Returns the snapshot to run for exactly one caller per job; every
    /// other caller gets `None`.
    pub async fn claim(&self, id: &BuildId) -> Result<Option<BuildJob>, TrackerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| TrackerError::UnknownJob(id.clone()))?;
        if job.claimed || job.state != JobState::Created {
            return Ok(None);
        }
        job.claimed = true;
        Ok(Some(job.clone()))
    }

    /// Wait until the job is terminal and return that snapshot.
    pub async fn wait_finished(&self, id: &BuildId) -> Result<BuildJob, TrackerError> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self
                .get(id)
                .await
                .ok_or_else(|| TrackerError::UnknownJob(id.clone()))?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            notified.await;
        }
    }

    /// Apply a lifecycle event and return the new state.
    pub async fn apply(&self, id: &BuildId, event: JobEvent) -> Result<JobState, TrackerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| TrackerError::UnknownJob(id.clone()))?;
        let from = job.state;
        let to = job.apply(event)?;
        match &job.error {
            Some(error) if to == JobState::Failed => {
                info!(build_id = %id, from = %from, to = %to, error = %error, "Job transition");
            }
            _ => info!(build_id = %id, from = %from, to = %to, "Job transition"),
        }
        drop(jobs);
        if to.is_terminal() {
            self.finished.notify_waiters();
        }
        Ok(to)
    }

    /// Record the environment backing a job. Terminal jobs are left alone.
    pub async fn attach_environment(&self, id: &BuildId, handle: EnvironmentHandle) {
        if let Some(job) = self.jobs.write().await.get_mut(id) {
            if job.state.is_terminal() {
                warn!(build_id = %id, "Refusing to attach environment to finished job");
                return;
            }
            job.environment = Some(handle);
        }
    }

    /// Clear the environment back-reference once it has been torn down.
    pub async fn detach_environment(&self, id: &BuildId) {
        if let Some(job) = self.jobs.write().await.get_mut(id) {
            job.environment = None;
        }
    }

    /// Drop terminal records finished more than `max_age` ago.
    ///
    /// Workspaces stay on disk; only the in-memory record goes.
    pub async fn prune_finished(&self, max_age: Duration) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            job.finished_at
                .map_or(true, |finished| finished.elapsed() < max_age)
        });
        before - jobs.len()
    }
}
