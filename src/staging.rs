//! Local staging area for the thumbnail pipeline.
//!
//! Remote objects are mirrored under a staging root at the same relative
//! path they have in the bucket, so `images/cat.png` is staged at
//! `{root}/images/cat.png` and its thumbnail at `{root}/images/thumb_cat.png`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

/// Scoped local working directory.
#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

/// The two local files a single pipeline run works with.
#[derive(Debug, Clone)]
pub struct StagedFiles {
    /// Local copy of the original object.
    pub source: PathBuf,
    /// Local thumbnail output.
    pub thumbnail: PathBuf,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path to its mirrored local path.
    ///
    /// Only plain relative components are accepted, so the result always
    /// stays under the staging root.
    pub fn local_path(&self, object_path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(object_path);
        if object_path.is_empty() {
            anyhow::bail!("empty object path");
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => anyhow::bail!("object path escapes staging root: {object_path}"),
            }
        }
        Ok(self.root.join(relative))
    }

    /// Local paths for an object and its derived thumbnail.
    pub fn files_for(&self, object_path: &str, thumb_path: &str) -> anyhow::Result<StagedFiles> {
        Ok(StagedFiles {
            source: self.local_path(object_path)?,
            thumbnail: self.local_path(thumb_path)?,
        })
    }
}

/// Create `path`'s parent directory (and ancestors) if missing.
pub async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

/// Delete a file, treating "already gone" as success.
pub async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl StagedFiles {
    /// Remove both staged files. Never fails; problems are logged.
    pub async fn cleanup(&self) {
        for path in [&self.source, &self.thumbnail] {
            if let Err(e) = remove_file(path).await {
                warn!(path = %path.display(), error = %e, "failed to remove staged file");
            }
        }
    }
}
