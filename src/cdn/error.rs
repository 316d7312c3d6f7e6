use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CdnError {
    #[error("Authorization rejected: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl CdnError {
    /// Whether retrying the same request can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CdnError::Network(_) | CdnError::Timeout => true,
            CdnError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CdnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CdnError::Timeout
        } else if err.is_decode() {
            CdnError::InvalidResponse(err.to_string())
        } else {
            CdnError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for CdnError {
    fn from(err: url::ParseError) -> Self {
        CdnError::InvalidUrl(err.to_string())
    }
}

pub type CdnResult<T> = Result<T, CdnError>;
