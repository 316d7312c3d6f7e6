use crate::auth::AuthError;
use crate::cdn::CdnError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("{filename}: network failure at offset {offset} after {attempts} attempts: {reason}")]
    Network {
        filename: String,
        offset: u64,
        attempts: u32,
        reason: String,
    },

    #[error("{filename}: chunk at offset {offset} failed verification after {attempts} attempts: {reason}")]
    Integrity {
        filename: String,
        offset: u64,
        attempts: u32,
        reason: String,
    },

    #[error("{filename}: download cancelled, resumable at offset {resume_offset}")]
    Cancelled { filename: String, resume_offset: u64 },

    #[error("{filename}: CDN request failed: {source}")]
    Cdn {
        filename: String,
        #[source]
        source: CdnError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download worker failed: {0}")]
    Worker(String),
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled { .. })
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
