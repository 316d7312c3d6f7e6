//! Guest runtime preparation
//!
//! The emulation layer that runs installed binaries is an external
//! collaborator. The pipeline only needs it prepared, with progress, and a
//! handle naming its root.

mod error;
mod rootfs;

pub use error::{RuntimeError, RuntimeResult};
pub use rootfs::VersionedRootfs;

use crate::progress::ProgressSender;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    pub root: PathBuf,
    pub version: u32,
}

#[async_trait]
pub trait GuestRuntime: Send + Sync {
    /// Make the runtime ready, reporting local progress in [0, 1]
    async fn prepare(&self, progress: ProgressSender<f64>) -> RuntimeResult<RuntimeHandle>;
}
