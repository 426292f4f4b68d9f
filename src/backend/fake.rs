//! Scripted in-memory backend for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;

use super::{
    BackendError, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, ManagedEnvironment,
    OutputStream, BUILD_ID_LABEL,
};

/// What the fake environment does once started.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub unreachable: bool,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_remove: bool,
    /// Never exit on its own; only `kill` ends it.
    pub hang: bool,
    /// Exit normally but keep the output stream open until `kill`.
    pub linger_output: bool,
    pub exit_code: i64,
    pub output: Vec<Vec<u8>>,
    /// Files written into the workspace before exiting.
    pub files: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub ping: usize,
    pub create: Vec<EnvironmentSpec>,
    pub start: usize,
    pub kill: usize,
    pub stop: Vec<String>,
    pub remove: Vec<String>,
}

struct Env {
    spec: EnvironmentSpec,
    killed: watch::Sender<bool>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Calls>>,
    envs: Arc<Mutex<HashMap<String, Env>>>,
}

impl FakeBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap()
    }

    /// Register an environment as if left behind by an earlier process.
    pub fn plant(&self, name: &str, build_id: &str) {
        let (killed, _) = watch::channel(false);
        let spec = EnvironmentSpec {
            name: name.to_string(),
            image: "img".into(),
            command: Vec::new(),
            workspace: PathBuf::new(),
            output_mount: "/out".into(),
            env: Vec::new(),
            labels: HashMap::from([(BUILD_ID_LABEL.to_string(), build_id.to_string())]),
        };
        self.envs
            .lock()
            .unwrap()
            .insert(name.to_string(), Env { spec, killed });
    }

    pub fn live_environments(&self) -> usize {
        self.envs.lock().unwrap().len()
    }

    fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }

    fn killed_rx(&self, env: &EnvironmentHandle) -> Option<watch::Receiver<bool>> {
        self.envs
            .lock()
            .unwrap()
            .get(&env.id)
            .map(|e| e.killed.subscribe())
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.calls().ping += 1;
        if self.script().unreachable {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, BackendError> {
        self.calls().create.push(spec.clone());
        if self.script().fail_create {
            return Err(BackendError::Request("No such image: builder".into()));
        }
        let (killed, _) = watch::channel(false);
        self.envs.lock().unwrap().insert(
            spec.name.clone(),
            Env {
                spec: spec.clone(),
                killed,
            },
        );
        Ok(EnvironmentHandle::named(spec.name.clone()))
    }

    async fn start(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.calls().start += 1;
        let script = self.script();
        if script.fail_start {
            return Err(BackendError::Request("port already allocated".into()));
        }
        let workspace = self
            .envs
            .lock()
            .unwrap()
            .get(&env.id)
            .map(|e| e.spec.workspace.clone())
            .ok_or_else(|| BackendError::NotFound(env.id.clone()))?;
        for (rel, bytes) in &script.files {
            let path = workspace.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BackendError::Request(e.to_string()))?;
            }
            std::fs::write(&path, bytes).map_err(|e| BackendError::Request(e.to_string()))?;
        }
        Ok(())
    }

    fn output(&self, env: &EnvironmentHandle) -> OutputStream {
        let script = self.script();
        let chunks = stream::iter(script.output.into_iter().map(Ok));
        match (script.hang || script.linger_output, self.killed_rx(env)) {
            (true, Some(mut rx)) => chunks
                .chain(
                    stream::once(async move {
                        let _ = rx.wait_for(|killed| *killed).await;
                    })
                    .filter_map(|()| async { None }),
                )
                .boxed(),
            _ => chunks.boxed(),
        }
    }

    async fn wait(&self, env: &EnvironmentHandle) -> Result<i64, BackendError> {
        let script = self.script();
        if script.hang {
            let mut rx = self
                .killed_rx(env)
                .ok_or_else(|| BackendError::NotFound(env.id.clone()))?;
            let _ = rx.wait_for(|killed| *killed).await;
            return Ok(137);
        }
        Ok(script.exit_code)
    }

    async fn kill(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.calls().kill += 1;
        if let Some(e) = self.envs.lock().unwrap().get(&env.id) {
            e.killed.send_replace(true);
        }
        Ok(())
    }

    async fn stop(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.calls().stop.push(env.name.clone());
        if self.script().fail_stop {
            return Err(BackendError::Request("stop timed out".into()));
        }
        Ok(())
    }

    async fn remove(&self, env: &EnvironmentHandle) -> Result<(), BackendError> {
        self.calls().remove.push(env.name.clone());
        if self.script().fail_remove {
            return Err(BackendError::Request("removal already in progress".into()));
        }
        self.envs
            .lock()
            .unwrap()
            .remove(&env.id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(env.id.clone()))
    }

    async fn list_managed(&self) -> Result<Vec<ManagedEnvironment>, BackendError> {
        Ok(self
            .envs
            .lock()
            .unwrap()
            .iter()
            .map(|(name, env)| ManagedEnvironment {
                handle: EnvironmentHandle::named(name.clone()),
                build_id: env.spec.labels.get(BUILD_ID_LABEL).cloned(),
                running: !*env.killed.borrow(),
            })
            .collect())
    }
}
