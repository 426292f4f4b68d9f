//! Execution backend trait and implementations.
//!
//! A backend creates, starts, supervises and tears down one disposable
//! execution environment per build job. The builder program inside the
//! environment is opaque: it reads its inputs from environment variables,
//! writes artifacts under the output mount and exits with a meaningful code.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerBackend;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Label key marking environments owned by this daemon.
pub const MANAGED_BY_LABEL: &str = "managed_by";
/// Label value marking environments owned by this daemon.
pub const MANAGED_BY_VALUE: &str = "appizap-build-daemon";
/// Label key carrying the build id an environment belongs to.
pub const BUILD_ID_LABEL: &str = "build_id";

/// Combined stdout/stderr of an environment, as raw chunks.
pub type OutputStream = BoxStream<'static, Result<Vec<u8>, BackendError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("no such environment: {0}")]
    NotFound(String),

    #[error("{0}")]
    Request(String),
}

/// Everything needed to provision one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Deterministic name, derived from the build id.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Host directory bound read-write at `output_mount`.
    pub workspace: PathBuf,
    pub output_mount: String,
    /// Input parameters, exposed as environment variables.
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
}

/// Non-owning reference to a provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub id: String,
    pub name: String,
}

impl EnvironmentHandle {
    /// Refer to an environment by name only, e.g. when creation failed
    /// before an id was returned.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
        }
    }
}

/// An environment found by listing, with the build id it is tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedEnvironment {
    pub handle: EnvironmentHandle,
    pub build_id: Option<String>,
    pub running: bool,
}

/// Trait for execution backends.
///
/// Implementations are shared across concurrent jobs; every operation is
/// an independent request/response against the engine.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Provision (but do not start) an environment.
    async fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, BackendError>;

    async fn start(&self, env: &EnvironmentHandle) -> Result<(), BackendError>;

    /// Follow the combined output stream. Ends no later than environment exit.
    fn output(&self, env: &EnvironmentHandle) -> OutputStream;

    /// Block until the environment exits and return its exit code.
    async fn wait(&self, env: &EnvironmentHandle) -> Result<i64, BackendError>;

    /// Forcibly terminate a running environment.
    async fn kill(&self, env: &EnvironmentHandle) -> Result<(), BackendError>;

    /// Stop the environment. Stopping an exited environment is not an error.
    async fn stop(&self, env: &EnvironmentHandle) -> Result<(), BackendError>;

    /// Remove the environment and its resources.
    async fn remove(&self, env: &EnvironmentHandle) -> Result<(), BackendError>;

    /// List every environment labelled as managed by this daemon.
    async fn list_managed(&self) -> Result<Vec<ManagedEnvironment>, BackendError>;
}
