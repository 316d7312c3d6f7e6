pub mod error;
pub mod types;
pub mod verifier;

pub use error::{IntegrityError, IntegrityResult};
pub use types::VerifiedPrefix;
pub use verifier::IntegrityVerifier;
