use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Guest runtime root missing: {0}")]
    Missing(PathBuf),

    #[error("Guest runtime version {found} is older than required {required}")]
    Outdated { found: u32, required: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Guest runtime preparation failed: {0}")]
    Failed(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
