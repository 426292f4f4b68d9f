//! Artifact locator: maps `(build id, platform, file)` to a file inside the
//! build's workspace.
//!
//! Existence on disk is the only criterion; the locator never consults job
//! records, so artifacts stay downloadable after their record is pruned.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("rejected path segment {0:?}")]
    InvalidPath(String),

    #[error("artifact not found")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    builds_root: PathBuf,
}

impl ArtifactLocator {
    pub fn new(builds_root: impl Into<PathBuf>) -> Self {
        Self {
            builds_root: builds_root.into(),
        }
    }

    /// Resolve to an existing regular file.
    ///
    /// `build_id` and `platform` must be single plain segments; `file` may
    /// span several plain segments (`build/App.ipa`). All input is checked
    /// before the filesystem is touched.
    pub async fn resolve(
        &self,
        build_id: &str,
        platform: &str,
        file: &str,
    ) -> Result<PathBuf, ArtifactError> {
        check_segment(build_id)?;
        check_segment(platform)?;
        if file.is_empty() {
            return Err(ArtifactError::InvalidPath(file.to_string()));
        }
        for segment in file.split('/') {
            check_segment(segment)?;
        }

        let path = self.builds_root.join(build_id).join(platform).join(file);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ArtifactError::NotFound),
        }
    }
}

fn check_segment(segment: &str) -> Result<(), ArtifactError> {
    let plain = !segment.is_empty()
        && !segment.contains(['/', '\\', '\0', ':'])
        && matches!(
            Path::new(segment).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
    if plain {
        Ok(())
    } else {
        Err(ArtifactError::InvalidPath(segment.to_string()))
    }
}
