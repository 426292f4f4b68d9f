//! Build id minting and per-job workspace allocation.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::job::BuildId;

const SUFFIX_LEN: usize = 9;

/// A freshly minted id together with its created workspace directory.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: BuildId,
    pub workspace: PathBuf,
}

/// Mints unique build ids and creates `<builds_root>/<id>` for each.
#[derive(Debug)]
pub struct WorkspaceAllocator {
    builds_root: PathBuf,
    counter: AtomicU64,
}

impl WorkspaceAllocator {
    pub fn new(builds_root: impl Into<PathBuf>) -> Self {
        Self {
            builds_root: builds_root.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Mint an id that has never been handed out by this process.
    ///
    /// Format: `build-<unix millis>-<counter>-<random suffix>`.
    pub fn mint(&self) -> BuildId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        BuildId::from_minted(format!("build-{millis}-{seq}-{suffix}"))
    }

    /// Mint an id and create its workspace directory.
    ///
    /// The returned path is absolute so it can be bound into a container.
    pub async fn allocate(&self) -> io::Result<Allocation> {
        let id = self.mint();
        let path = self.builds_root.join(id.as_str());
        tokio::fs::create_dir_all(&path).await?;
        let workspace = tokio::fs::canonicalize(&path).await?;
        debug!(build_id = %id, workspace = %workspace.display(), "Allocated workspace");
        Ok(Allocation { id, workspace })
    }
}
