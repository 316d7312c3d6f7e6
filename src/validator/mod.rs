mod types;
mod validator;

pub use types::{
    GuestInstallState, StateFlagsMapping, ValidationError, ValidationReport, ValidatorConfig,
};
pub use validator::InstallationValidator;
