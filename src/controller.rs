//! Build controller: drives each job from `Created` to a terminal state.
//!
//! Per job: preflight the backend, provision one environment bound to the
//! job's workspace, start it, relay its output while waiting for exit, then
//! finalize from the exit code. Once provisioning has been attempted, every
//! path ends in exactly one teardown (stop, then remove). Teardown failures
//! are logged and never change the recorded outcome.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BackendError, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, BUILD_ID_LABEL,
    MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};
use crate::config::Config;
use crate::job::{BuildFailure, BuildId, BuildJob, BuildRequest, JobEvent};
use crate::relay::LogRelay;
use crate::tracker::{JobTracker, TrackerError};
use crate::workspace::{Allocation, WorkspaceAllocator};

/// Builder entry point inside the image.
const BUILD_COMMAND: [&str; 2] = ["/bin/bash", "/app/scripts/build-app.sh"];
/// Where the workspace is mounted inside the environment.
const OUTPUT_MOUNT: &str = "/app/output";

/// Runtime settings for the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Root under which each job's workspace is created.
    pub builds_dir: PathBuf,
    /// Directory for per-job log files.
    pub logs_dir: PathBuf,
    /// Builder image for every environment.
    pub image: String,
    /// Entry point run inside the environment.
    pub command: Vec<String>,
    /// Mount point of the workspace inside the environment.
    pub output_mount: String,
    /// Wall-clock budget from start to exit.
    pub build_timeout: Duration,
    /// How long to wait for the output stream to end after exit.
    pub relay_grace: Duration,
    /// Jobs allowed to run at once.
    pub max_concurrent: usize,
    /// Interval between reaper sweeps.
    pub reaper_interval: Duration,
    /// How long terminal job records are kept.
    pub job_retention: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            builds_dir: config.builds_dir.clone(),
            logs_dir: config.logs_dir.clone(),
            image: config.builder_image.clone(),
            command: BUILD_COMMAND.iter().map(ToString::to_string).collect(),
            output_mount: OUTPUT_MOUNT.to_string(),
            build_timeout: config.build_timeout(),
            relay_grace: config.relay_grace(),
            max_concurrent: config.max_concurrent_builds,
            reaper_interval: config.reaper_interval(),
            job_retention: config.job_retention(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to allocate workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Owns the shared backend client, the job tracker and the admission gate.
pub struct BuildController<B> {
    backend: Arc<B>,
    tracker: Arc<JobTracker>,
    allocator: WorkspaceAllocator,
    limiter: Semaphore,
    settings: ControllerSettings,
}

impl<B: ExecutionBackend + 'static> BuildController<B> {
    pub fn new(backend: Arc<B>, settings: ControllerSettings) -> Self {
        Self {
            backend,
            tracker: Arc::new(JobTracker::new()),
            allocator: WorkspaceAllocator::new(&settings.builds_dir),
            limiter: Semaphore::new(settings.max_concurrent.max(1)),
            settings,
        }
    }

    pub const fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Create a job record and its workspace. The job starts in `Created`.
    pub async fn submit(&self, request: BuildRequest) -> Result<BuildId, SubmitError> {
        let Allocation { id, workspace } = self.allocator.allocate().await?;
        let log_path = self.settings.logs_dir.join(format!("{id}.log"));
        info!(
            build_id = %id,
            url = %request.source_url,
            app_name = %request.app_name,
            "Build submitted"
        );
        self.tracker
            .insert(BuildJob::new(id.clone(), request, workspace, log_path))
            .await;
        Ok(id)
    }

    /// Submit and run to completion, returning the terminal snapshot.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildJob, SubmitError> {
        let id = self.submit(request).await?;
        Ok(self.run_job(&id).await?)
    }

    /// Submit and run in the background; returns as soon as the job exists.
    pub async fn spawn_build(self: &Arc<Self>, request: BuildRequest) -> Result<BuildId, SubmitError> {
        let id = self.submit(request).await?;
        let controller = Arc::clone(self);
        let job_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.run_job(&job_id).await {
                error!(build_id = %job_id, error = %e, "Background build aborted");
            }
        });
        Ok(id)
    }

    /// Drive a `Created` job to a terminal state.
    ///
    /// Only the first caller for a job runs it; later callers wait for that
    /// run to finish. Waits for a free build slot first; queued jobs stay
    /// in `Created`.
    pub async fn run_job(&self, id: &BuildId) -> Result<BuildJob, TrackerError> {
        let Some(job) = self.tracker.claim(id).await? else {
            debug!(build_id = %id, "Job already claimed, waiting for it to finish");
            return self.tracker.wait_finished(id).await;
        };

        if self.limiter.available_permits() == 0 {
            info!(build_id = %id, "Waiting for a free build slot");
        }
        let _permit = self.limiter.acquire().await.ok();

        let started = Instant::now();
        self.drive(&job).await;
        debug!(build_id = %id, elapsed_ms = started.elapsed().as_millis(), "Job finished");

        self.tracker.wait_finished(id).await
    }

    async fn drive(&self, job: &BuildJob) {
        let id = &job.id;

        if let Err(e) = self.backend.ping().await {
            warn!(build_id = %id, error = %e, "Build backend is not responding");
            self.record(id, JobEvent::Failed(BuildFailure::BackendUnavailable(e.to_string())))
                .await;
            return;
        }

        self.record(id, JobEvent::EnvironmentRequested).await;
        let spec = self.environment_spec(job);

        let (outcome, environment) = match self.backend.create(&spec).await {
            Ok(handle) => {
                debug!(build_id = %id, environment = %handle.id, "Environment created");
                self.tracker.attach_environment(id, handle.clone()).await;
                (self.supervise(job, &handle).await, handle)
            }
            Err(e) => {
                error!(build_id = %id, error = %e, "Failed to create build environment");
                // Reclaim anything half-created under the deterministic name.
                (
                    JobEvent::Failed(BuildFailure::Provisioning(e.to_string())),
                    EnvironmentHandle::named(spec.name.clone()),
                )
            }
        };

        self.record(id, outcome).await;
        self.teardown(id, &environment).await;
    }

    async fn supervise(&self, job: &BuildJob, env: &EnvironmentHandle) -> JobEvent {
        if let Err(e) = self.backend.start(env).await {
            error!(build_id = %job.id, error = %e, "Failed to start build environment");
            return JobEvent::Failed(BuildFailure::Start(e.to_string()));
        }
        self.record(&job.id, JobEvent::EnvironmentStarted).await;
        self.observe(job, env).await
    }

    /// Relay output and wait for exit; both must finish before returning.
    async fn observe(&self, job: &BuildJob, env: &EnvironmentHandle) -> JobEvent {
        let relay = LogRelay::new(job.id.clone(), job.log_path.clone());
        let mut relay_task = tokio::spawn(relay.run(self.backend.output(env)));

        let budget = self.settings.build_timeout;
        let event = match tokio::time::timeout(budget, self.backend.wait(env)).await {
            Ok(Ok(code)) => {
                info!(build_id = %job.id, exit_code = code, "Build environment exited");
                JobEvent::Exited(code)
            }
            Ok(Err(e)) => {
                error!(build_id = %job.id, error = %e, "Lost track of build environment");
                JobEvent::Failed(BuildFailure::Supervision(e.to_string()))
            }
            Err(_) => {
                warn!(build_id = %job.id, budget_secs = budget.as_secs(), "Build timed out, killing environment");
                if let Err(e) = self.backend.kill(env).await {
                    warn!(build_id = %job.id, error = %e, "Failed to kill timed out environment");
                }
                JobEvent::Failed(BuildFailure::TimedOut(budget))
            }
        };

        match tokio::time::timeout(self.settings.relay_grace, &mut relay_task).await {
            Ok(Ok(Ok(stats))) => {
                debug!(build_id = %job.id, bytes = stats.bytes, lines = stats.lines, "Build log complete");
            }
            Ok(Ok(Err(e))) => {
                warn!(
                    build_id = %job.id,
                    path = %job.log_path.display(),
                    lines = e.stats.lines,
                    error = %e,
                    "Build log incomplete"
                );
            }
            Ok(Err(e)) => warn!(build_id = %job.id, error = %e, "Log relay task failed"),
            Err(_) => {
                error!(
                    build_id = %job.id,
                    path = %job.log_path.display(),
                    grace_secs = self.settings.relay_grace.as_secs(),
                    "Output stream did not end after exit, build log truncated"
                );
                relay_task.abort();
            }
        }

        event
    }

    /// Stop then remove. Best-effort; never touches the job's outcome.
    async fn teardown(&self, id: &BuildId, env: &EnvironmentHandle) {
        match self.backend.stop(env).await {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => debug!(build_id = %id, "Environment already gone"),
            Err(e) => warn!(build_id = %id, environment = %env.name, error = %e, "Failed to stop environment"),
        }
        match self.backend.remove(env).await {
            Ok(()) => debug!(build_id = %id, environment = %env.name, "Environment removed"),
            Err(BackendError::NotFound(_)) => debug!(build_id = %id, "Environment already removed"),
            Err(e) => warn!(build_id = %id, environment = %env.name, error = %e, "Failed to remove environment"),
        }
        self.tracker.detach_environment(id).await;
    }

    async fn record(&self, id: &BuildId, event: JobEvent) {
        if let Err(e) = self.tracker.apply(id, event).await {
            error!(build_id = %id, error = %e, "Rejected job transition");
        }
    }

    fn environment_spec(&self, job: &BuildJob) -> EnvironmentSpec {
        let request = &job.request;
        let app_config = serde_json::to_string(&request.app_config).unwrap_or_else(|e| {
            warn!(build_id = %job.id, error = %e, "Failed to serialize app config");
            "{}".to_string()
        });

        EnvironmentSpec {
            name: environment_name(&job.id),
            image: self.settings.image.clone(),
            command: self.settings.command.clone(),
            workspace: job.workspace.clone(),
            output_mount: self.settings.output_mount.clone(),
            env: vec![
                ("APP_URL".into(), request.source_url.clone()),
                ("APP_NAME".into(), request.app_name.clone()),
                ("APP_CONFIG".into(), app_config),
                ("BUILD_ID".into(), job.id.to_string()),
                ("DEBIAN_FRONTEND".into(), "noninteractive".into()),
            ],
            labels: HashMap::from([
                (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
                (BUILD_ID_LABEL.to_string(), job.id.to_string()),
            ]),
        }
    }

    /// Remove managed environments that no live job accounts for.
    pub async fn reap_orphans(&self) -> usize {
        let environments = match self.backend.list_managed().await {
            Ok(envs) => envs,
            Err(e) => {
                warn!(error = %e, "Reaper could not list environments");
                return 0;
            }
        };

        let mut reaped = 0;
        for env in environments {
            if let Some(build_id) = &env.build_id {
                if self.tracker.is_live(build_id).await {
                    continue;
                }
            }
            warn!(environment = %env.handle.name, build_id = ?env.build_id, "Reaping orphaned build environment");
            if env.running {
                if let Err(e) = self.backend.kill(&env.handle).await {
                    warn!(environment = %env.handle.name, error = %e, "Failed to kill orphan");
                }
            }
            match self.backend.remove(&env.handle).await {
                Ok(()) => reaped += 1,
                Err(BackendError::NotFound(_)) => {}
                Err(e) => warn!(environment = %env.handle.name, error = %e, "Failed to remove orphan"),
            }
        }
        reaped
    }

    /// One reaper pass: orphaned environments, then stale job records.
    pub async fn sweep(&self) {
        let reaped = self.reap_orphans().await;
        let pruned = self.tracker.prune_finished(self.settings.job_retention).await;
        if reaped > 0 || pruned > 0 {
            info!(reaped, pruned, "Reaper sweep");
        } else {
            debug!("Reaper sweep");
        }
    }

    /// Start the background reaper task.
    ///
    /// The first sweep runs immediately so leftovers from a previous
    /// process are reclaimed at startup.
    pub fn start_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        let interval = controller.settings.reaper_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                controller.sweep().await;
            }
        })
    }
}

/// Environment name for a build, also used to reclaim partial creations.
pub fn environment_name(id: &BuildId) -> String {
    format!("appizap-{id}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::backend::fake::{FakeBackend, Script};
    use crate::job::{AppConfig, JobState};

    fn settings(dir: &std::path::Path) -> ControllerSettings {
        ControllerSettings {
            builds_dir: dir.join("builds"),
            logs_dir: dir.join("logs"),
            image: "react-native-builder:latest".into(),
            command: BUILD_COMMAND.iter().map(ToString::to_string).collect(),
            output_mount: OUTPUT_MOUNT.into(),
            build_timeout: Duration::from_secs(10),
            relay_grace: Duration::from_secs(5),
            max_concurrent: 4,
            reaper_interval: Duration::from_secs(60),
            job_retention: Duration::from_secs(3600),
        }
    }

    fn controller(
        script: Script,
        settings: ControllerSettings,
    ) -> (Arc<BuildController<FakeBackend>>, FakeBackend) {
        let backend = FakeBackend::new(script);
        let controller = Arc::new(BuildController::new(Arc::new(backend.clone()), settings));
        (controller, backend)
    }

    fn request() -> BuildRequest {
        BuildRequest {
            source_url: "https://example.com".into(),
            app_name: "Demo".into(),
            app_config: AppConfig {
                name: "Demo".into(),
                bundle_id: Some("com.example.demo".into()),
                ..AppConfig::default()
            },
        }
    }

    fn assert_single_teardown(backend: &FakeBackend) {
        let calls = backend.calls();
        assert_eq!(calls.stop.len(), 1, "stop calls: {:?}", calls.stop);
        assert_eq!(calls.remove.len(), 1, "remove calls: {:?}", calls.remove);
    }

    #[tokio::test]
    async fn test_zero_exit_succeeds_and_tears_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                output: vec![b"installing\n".to_vec(), b"bundling\ndone".to_vec()],
                files: vec![("android/app-release.apk".into(), b"APK".to_vec())],
                ..Script::default()
            },
            settings(dir.path()),
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.exit_code, Some(0));
        assert!(job.error.is_none());
        assert!(job.environment.is_none());
        assert!(job.workspace.join("android/app-release.apk").is_file());
        assert_eq!(backend.calls().create.len(), 1);
        assert_single_teardown(&backend);
        assert_eq!(backend.live_environments(), 0);

        let log = std::fs::read_to_string(&job.log_path).unwrap();
        assert_eq!(log, "installing\nbundling\ndone");
        assert!(job.log_path.starts_with(dir.path().join("logs")));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                exit_code: 3,
                output: vec![b"gradle failed\n".to_vec()],
                ..Script::default()
            },
            settings(dir.path()),
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.exit_code, Some(3));
        assert_eq!(job.error, Some(BuildFailure::NonZeroExit(3)));
        assert!(job.error.unwrap().to_string().contains('3'));
        assert_single_teardown(&backend);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_before_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                unreachable: true,
                ..Script::default()
            },
            settings(dir.path()),
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert!(matches!(job.error, Some(BuildFailure::BackendUnavailable(_))));
        assert!(job.environment.is_none());
        let calls = backend.calls();
        assert_eq!(calls.ping, 1);
        assert!(calls.create.is_empty());
        assert!(calls.stop.is_empty());
        assert!(calls.remove.is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_failure_reclaims_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                fail_create: true,
                ..Script::default()
            },
            settings(dir.path()),
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert!(matches!(job.error, Some(BuildFailure::Provisioning(_))));
        assert!(job.environment.is_none());
        assert_single_teardown(&backend);
        assert_eq!(backend.calls().remove[0], environment_name(&job.id));
    }

    #[tokio::test]
    async fn test_start_failure_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                fail_start: true,
                ..Script::default()
            },
            settings(dir.path()),
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert!(matches!(job.error, Some(BuildFailure::Start(_))));
        assert_single_teardown(&backend);
        assert_eq!(backend.live_environments(), 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.build_timeout = Duration::from_millis(100);
        let (controller, backend) = controller(
            Script {
                hang: true,
                output: vec![b"still working\n".to_vec()],
                ..Script::default()
            },
            settings,
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.error,
            Some(BuildFailure::TimedOut(Duration::from_millis(100)))
        );
        assert_eq!(backend.calls().kill, 1);
        assert_single_teardown(&backend);
        assert_eq!(std::fs::read_to_string(&job.log_path).unwrap(), "still working\n");
    }

    #[tokio::test]
    async fn test_teardown_errors_do_not_override_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                fail_stop: true,
                fail_remove: true,
                ..Script::default()
            },
            settings(dir.path()),
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Succeeded);
        assert!(job.error.is_none());
        assert_single_teardown(&backend);
    }

    #[tokio::test]
    async fn test_environment_receives_inputs_and_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(Script::default(), settings(dir.path()));

        let job = controller.build(request()).await.unwrap();

        let calls = backend.calls();
        let spec = &calls.create[0];
        assert_eq!(spec.workspace, job.workspace);
        assert_eq!(spec.output_mount, "/app/output");
        assert_eq!(spec.image, "react-native-builder:latest");
        assert_eq!(spec.labels[BUILD_ID_LABEL], job.id.to_string());
        assert_eq!(spec.labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);

        let env: HashMap<_, _> = spec.env.iter().cloned().collect();
        assert_eq!(env["APP_URL"], "https://example.com");
        assert_eq!(env["APP_NAME"], "Demo");
        assert_eq!(env["BUILD_ID"], job.id.to_string());
        let config: serde_json::Value = serde_json::from_str(&env["APP_CONFIG"]).unwrap();
        assert_eq!(config["bundleId"], "com.example.demo");
    }

    #[tokio::test]
    async fn test_concurrent_jobs_each_get_their_own_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.max_concurrent = 2;
        let (controller, backend) = controller(
            Script {
                output: vec![b"ok\n".to_vec()],
                ..Script::default()
            },
            settings,
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = Arc::clone(&controller);
            handles.push(tokio::spawn(async move { controller.build(request()).await }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            let job = handle.await.unwrap().unwrap();
            assert_eq!(job.state, JobState::Succeeded);
            assert!(ids.insert(job.id));
        }

        let calls = backend.calls();
        let names: HashSet<_> = calls.create.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names.len(), 8);
        assert_eq!(calls.remove.len(), 8);
    }

    #[tokio::test]
    async fn test_spawn_build_returns_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _backend) = controller(Script::default(), settings(dir.path()));

        let id = controller.spawn_build(request()).await.unwrap();
        assert!(controller.tracker().get(&id).await.is_some());

        let job = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = controller.tracker().get(&id).await.unwrap();
                if job.state.is_terminal() {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(job.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_concurrent_runs_of_one_job_provision_once() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(
            Script {
                output: vec![b"building\n".to_vec()],
                ..Script::default()
            },
            settings(dir.path()),
        );

        let id = controller.submit(request()).await.unwrap();
        let (first, second) = tokio::join!(controller.run_job(&id), controller.run_job(&id));

        assert_eq!(first.unwrap().state, JobState::Succeeded);
        assert_eq!(second.unwrap().state, JobState::Succeeded);
        assert_eq!(backend.calls().create.len(), 1);
        assert_single_teardown(&backend);
    }

    #[tokio::test]
    async fn test_lingering_output_is_cut_off_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.relay_grace = Duration::from_millis(50);
        let (controller, backend) = controller(
            Script {
                linger_output: true,
                output: vec![b"done\n".to_vec()],
                ..Script::default()
            },
            settings,
        );

        let job = controller.build(request()).await.unwrap();

        assert_eq!(job.state, JobState::Succeeded);
        assert_single_teardown(&backend);
    }

    #[tokio::test]
    async fn test_run_job_is_not_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(Script::default(), settings(dir.path()));

        let job = controller.build(request()).await.unwrap();
        let again = controller.run_job(&job.id).await.unwrap();

        assert_eq!(again.state, JobState::Succeeded);
        assert_eq!(backend.calls().create.len(), 1);
    }

    #[tokio::test]
    async fn test_reaper_removes_only_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, backend) = controller(Script::default(), settings(dir.path()));

        let live = controller.submit(request()).await.unwrap();
        backend.plant(&environment_name(&live), live.as_str());
        backend.plant("appizap-build-0-0-orphaned", "build-0-0-orphaned");

        assert_eq!(controller.reap_orphans().await, 1);
        assert_eq!(backend.live_environments(), 1);
        assert_eq!(backend.calls().kill, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _backend) = controller(Script::default(), settings(dir.path()));

        let missing = BuildId::parse("build-missing").unwrap();
        assert!(matches!(
            controller.run_job(&missing).await,
            Err(TrackerError::UnknownJob(_))
        ));
    }
}
