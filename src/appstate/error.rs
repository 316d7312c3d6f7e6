use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppStateError {
    #[error("State file not found: {0}")]
    Missing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Missing key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

pub type AppStateResult<T> = Result<T, AppStateError>;
