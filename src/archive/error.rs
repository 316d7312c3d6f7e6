use thiserror::Error;
use zip::result::ZipError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    #[error("Archive entry escapes destination: {0}")]
    PathTraversal(String),

    #[error("Nested payload '{0}' not found in archive")]
    NestedEntryMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction cancelled after {files_extracted} entries")]
    Cancelled { files_extracted: usize },

    #[error("Extraction task failed: {0}")]
    Join(String),
}

impl From<ZipError> for ArchiveError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => ArchiveError::Io(e),
            other => ArchiveError::Corrupt(other.to_string()),
        }
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
