use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Chunk at offset {offset}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Chunk at offset {offset}: SHA-1 mismatch (expected {expected}, got {actual})")]
    Sha1Mismatch {
        offset: u64,
        expected: String,
        actual: String,
    },

    #[error("Chunk at offset {offset}: CRC32 mismatch (expected {expected:#010x}, got {actual:#010x})")]
    Crc32Mismatch { offset: u64, expected: u32, actual: u32 },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
