use crate::progress::{emit, ProgressSender};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::{GuestRuntime, RuntimeHandle};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub const VERSION_MARKER: &str = ".rootfs/.img_version";

/// A pre-installed guest root filesystem with a version marker file.
///
/// The marker holds the image version on its first line; a missing marker
/// counts as version 0.
pub struct VersionedRootfs {
    root: PathBuf,
    min_version: u32,
}

impl VersionedRootfs {
    pub fn new(root: impl Into<PathBuf>, min_version: u32) -> Self {
        Self {
            root: root.into(),
            min_version,
        }
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(VERSION_MARKER)
    }

    /// Installed image version
    pub async fn version(&self) -> RuntimeResult<u32> {
        read_version(&self.marker_path()).await
    }

    /// Stamp `version` into the marker file
    pub async fn write_version(&self, version: u32) -> RuntimeResult<()> {
        let marker = self.marker_path();
        if let Some(parent) = marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&marker, format!("{}\n", version)).await?;
        Ok(())
    }
}

async fn read_version(marker: &Path) -> RuntimeResult<u32> {
    let text = match tokio::fs::read_to_string(marker).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let first = text.lines().next().unwrap_or("").trim();
    first
        .parse()
        .map_err(|_| RuntimeError::Failed(format!("unreadable version marker {:?}", first)))
}

#[async_trait]
impl GuestRuntime for VersionedRootfs {
    async fn prepare(&self, progress: ProgressSender<f64>) -> RuntimeResult<RuntimeHandle> {
        emit(&progress, 0.0);

        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(RuntimeError::Missing(self.root.clone()));
        }
        emit(&progress, 0.5);

        let version = self.version().await?;
        if version < self.min_version {
            return Err(RuntimeError::Outdated {
                found: version,
                required: self.min_version,
            });
        }

        tracing::debug!(root = %self.root.display(), version, "Guest runtime ready");
        emit(&progress, 1.0);
        Ok(RuntimeHandle {
            root: self.root.clone(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::progress_channel;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ready_rootfs() {
        let dir = TempDir::new().unwrap();
        let rootfs = VersionedRootfs::new(dir.path(), 3);
        rootfs.write_version(4).await.unwrap();

        let (tx, mut rx) = progress_channel();
        let handle = rootfs.prepare(tx).await.unwrap();
        assert_eq!(handle.version, 4);

        let mut events = Vec::new();
        while let Ok(p) = rx.try_recv() {
            events.push(p);
        }
        assert_eq!(events, vec![0.0, 0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_missing_marker_is_version_zero() {
        let dir = TempDir::new().unwrap();
        let rootfs = VersionedRootfs::new(dir.path(), 1);
        assert_eq!(rootfs.version().await.unwrap(), 0);

        let (tx, _rx) = progress_channel();
        let result = rootfs.prepare(tx).await;
        assert!(matches!(result, Err(RuntimeError::Outdated { found: 0, required: 1 })));
    }

    #[tokio::test]
    async fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let rootfs = VersionedRootfs::new(dir.path().join("absent"), 0);

        let (tx, _rx) = progress_channel();
        assert!(matches!(rootfs.prepare(tx).await, Err(RuntimeError::Missing(_))));
    }

    #[tokio::test]
    async fn test_garbage_marker() {
        let dir = TempDir::new().unwrap();
        let rootfs = VersionedRootfs::new(dir.path(), 0);
        tokio::fs::create_dir_all(dir.path().join(".rootfs")).await.unwrap();
        tokio::fs::write(rootfs.marker_path(), "v-two").await.unwrap();

        assert!(matches!(rootfs.version().await, Err(RuntimeError::Failed(_))));
    }
}
