use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Install record not found: {0}")]
    NotFound(String),

    #[error("Install record already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        RecordError::DatabaseError(err.to_string())
    }
}

pub type RecordResult<T> = Result<T, RecordError>;
