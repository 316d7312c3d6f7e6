mod error;
mod extractor;
mod types;

pub use error::{ArchiveError, ArchiveResult};
pub use extractor::BootstrapArchiveExtractor;
pub use types::{BootstrapArchive, ExtractConfig, ExtractProgress, ExtractSummary};
