use crate::archive::ArchiveError;
use crate::auth::AuthError;
use crate::cdn::CdnError;
use crate::depot::DepotError;
use crate::download::DownloadError;
use crate::pipeline::types::PipelineStage;
use crate::record::RecordError;
use crate::runtime::RuntimeError;
use crate::validator::ValidationReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Install of app {app_id} into {} already in progress", container.display())]
    AlreadyInProgress { app_id: u32, container: PathBuf },

    #[error("Install record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid install request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Stage {stage} exceeded its {limit:?} limit")]
    Timeout {
        stage: PipelineStage,
        limit: Duration,
    },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("Installation failed validation: {}", .0.summary())]
    ValidationFailed(ValidationReport),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Depot error: {0}")]
    Depot(#[from] DepotError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse failure class reported to callers and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Auth,
    Network,
    Integrity,
    Corrupt,
    Timeout,
    ParseError,
    ValidationFailed,
    Cancelled,
    Io,
    Conflict,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn cdn_kind(err: &CdnError) -> ErrorKind {
    match err {
        CdnError::Unauthorized(_) => ErrorKind::Auth,
        CdnError::InvalidResponse(_) => ErrorKind::ParseError,
        _ => ErrorKind::Network,
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::AlreadyInProgress { .. } | PipelineError::InvalidStateTransition(_) => {
                ErrorKind::Conflict
            }
            PipelineError::RecordNotFound(_) | PipelineError::Record(_) => ErrorKind::Io,
            PipelineError::InvalidRequest(_) => ErrorKind::ParseError,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
            PipelineError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            PipelineError::Runtime(_) => ErrorKind::Runtime,
            PipelineError::Auth(_) => ErrorKind::Auth,
            PipelineError::Depot(e) => match e {
                DepotError::Parse(_) | DepotError::InvariantViolated(_) | DepotError::UnsafePath(_) => {
                    ErrorKind::ParseError
                }
                DepotError::ManifestMismatch(_) => ErrorKind::Integrity,
                DepotError::Cdn(e) => cdn_kind(e),
                DepotError::AppNotFound(_)
                | DepotError::DepotNotFound { .. }
                | DepotError::FileNotFound { .. } => ErrorKind::Network,
            },
            PipelineError::Download(e) => match e {
                DownloadError::Auth(_) => ErrorKind::Auth,
                DownloadError::Network { .. } => ErrorKind::Network,
                DownloadError::Integrity { .. } => ErrorKind::Integrity,
                DownloadError::Cancelled { .. } => ErrorKind::Cancelled,
                DownloadError::Cdn { source, .. } => cdn_kind(source),
                DownloadError::Io(_) | DownloadError::Worker(_) => ErrorKind::Io,
            },
            PipelineError::Archive(e) => match e {
                ArchiveError::Corrupt(_)
                | ArchiveError::PathTraversal(_)
                | ArchiveError::NestedEntryMissing(_) => ErrorKind::Corrupt,
                ArchiveError::Cancelled { .. } => ErrorKind::Cancelled,
                ArchiveError::Io(_) | ArchiveError::Join(_) => ErrorKind::Io,
            },
            PipelineError::IoError(_) => ErrorKind::Io,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_errors_classify_by_cause() {
        let integrity = PipelineError::from(DownloadError::Integrity {
            filename: "a.bin".into(),
            offset: 0,
            attempts: 3,
            reason: "sha1".into(),
        });
        assert_eq!(integrity.kind(), ErrorKind::Integrity);

        let cancelled = PipelineError::from(ArchiveError::Cancelled { files_extracted: 2 });
        assert!(cancelled.is_cancelled());

        let unauthorized = PipelineError::from(DepotError::Cdn(CdnError::Unauthorized("expired".into())));
        assert_eq!(unauthorized.kind(), ErrorKind::Auth);

        let traversal = PipelineError::from(ArchiveError::PathTraversal("../x".into()));
        assert_eq!(traversal.kind(), ErrorKind::Corrupt);

        let timeout = PipelineError::Timeout {
            stage: PipelineStage::Unpacking,
            limit: Duration::from_secs(1),
        };
        assert_eq!(timeout.kind().as_str(), "timeout");
    }
}
