mod error;
mod keyvalues;
mod parser;
mod types;

pub use error::{AppStateError, AppStateResult};
pub use keyvalues::{KvSection, KvValue};
pub use parser::AppManifestParser;
pub use types::AppState;
