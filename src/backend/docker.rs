//! Docker engine backend.
//!
//! Each build runs in its own container created from the builder image,
//! with the job workspace bind-mounted as the output directory.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, instrument};

use super::{
    BackendError, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, ManagedEnvironment,
    OutputStream, BUILD_ID_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};

/// Seconds the engine waits for a graceful stop before killing.
const STOP_GRACE_SECONDS: i64 = 10;

/// Backend that runs builds in Docker containers.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect using the local defaults (`DOCKER_HOST` or the platform socket).
    pub fn connect() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

fn map_err(err: DockerError) -> BackendError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => BackendError::NotFound(message),
        DockerError::IOError { err } => BackendError::Unavailable(err.to_string()),
        other => BackendError::Request(other.to_string()),
    }
}

const fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, BackendError> {
        let bind = format!(
            "{}:{}",
            spec.workspace.to_string_lossy().replace('\\', "/"),
            spec.output_mount
        );
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(map_err)?;

        for warning in &created.warnings {
            debug!(warning = %warning, "Engine warning on create");
        }

        Ok(EnvironmentHandle {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    #[instrument(skip(self), fields(name = %env.name))]
    async fn start(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.docker
            .start_container(&env.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    fn output(&self, env: &EnvironmentHandle) -> OutputStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        self.docker
            .logs(&env.id, Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::Console { message },
                    ) => Some(Ok(message.to_vec())),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(map_err(e))),
                }
            })
            .boxed()
    }

    #[instrument(skip(self), fields(name = %env.name))]
    async fn wait(&self, env: &EnvironmentHandle) -> Result<i64, BackendError> {
        let mut stream = self
            .docker
            .wait_container(&env.id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // The engine reports non-zero exits through the error channel.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(map_err(e)),
            None => {
                let inspect = self
                    .docker
                    .inspect_container(&env.id, None)
                    .await
                    .map_err(map_err)?;
                inspect
                    .state
                    .and_then(|s| s.exit_code)
                    .ok_or_else(|| BackendError::Request("wait stream closed without exit code".into()))
            }
        }
    }

    #[instrument(skip(self), fields(name = %env.name))]
    async fn kill(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.docker
            .kill_container(&env.id, None::<KillContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    #[instrument(skip(self), fields(name = %env.name))]
    async fn stop(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        match self
            .docker
            .stop_container(
                &env.id,
                Some(StopContainerOptions {
                    t: STOP_GRACE_SECONDS,
                }),
            )
            .await
        {
            Err(e) if is_not_modified(&e) => Ok(()),
            other => other.map_err(map_err),
        }
    }

    #[instrument(skip(self), fields(name = %env.name))]
    async fn remove(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.docker
            .remove_container(
                &env.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn list_managed(&self) -> Result<Vec<ManagedEnvironment>, BackendError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")],
        );
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map_or_else(|| id.clone(), |n| n.trim_start_matches('/').to_string());
                Some(ManagedEnvironment {
                    handle: EnvironmentHandle { id, name },
                    build_id: c.labels.and_then(|mut l| l.remove(BUILD_ID_LABEL)),
                    running: c.state.as_deref() == Some("running"),
                })
            })
            .collect())
    }
}
