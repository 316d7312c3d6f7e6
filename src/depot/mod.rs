mod catalog;
mod error;
mod manifest;
mod types;

pub use catalog::{DepotCatalog, DEFAULT_BRANCH};
pub use error::{DepotError, DepotResult};
pub use types::{
    AppInfo, ChunkCodec, DepotFile, DepotInfo, DepotManifest, FileChunk, ManifestInfo,
    FLAG_DIRECTORY, FLAG_EXECUTABLE,
};
