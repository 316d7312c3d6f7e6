mod error;
mod manager;
mod types;

pub use error::{AuthError, AuthResult};
pub use manager::CdnAuthTokenManager;
pub use types::CdnAuthToken;
