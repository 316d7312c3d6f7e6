use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("CDN token rejected for app {app_id}: {reason}")]
    Rejected { app_id: u32, reason: String },

    #[error("CDN issued an already expired token for app {app_id}")]
    ExpiredOnArrival { app_id: u32 },

    #[error("Token service unavailable for app {app_id} after {attempts} attempts: {reason}")]
    Unavailable {
        app_id: u32,
        attempts: u32,
        reason: String,
    },

    #[error("CDN error: {0}")]
    Cdn(#[from] crate::cdn::CdnError),
}

pub type AuthResult<T> = Result<T, AuthError>;
