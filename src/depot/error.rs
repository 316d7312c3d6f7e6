use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepotError {
    #[error("Malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Manifest invariant violated: {0}")]
    InvariantViolated(String),

    #[error("Unsafe file name in manifest: {0}")]
    UnsafePath(String),

    #[error("App {0} not found in catalog")]
    AppNotFound(u32),

    #[error("Depot {depot_id} of app {app_id} has no manifest for branch '{branch}'")]
    DepotNotFound {
        app_id: u32,
        depot_id: u32,
        branch: String,
    },

    #[error("File {filename} not found in depot {depot_id}")]
    FileNotFound { depot_id: u32, filename: String },

    #[error("Fetched manifest does not match catalog: {0}")]
    ManifestMismatch(String),

    #[error("CDN error: {0}")]
    Cdn(#[from] crate::cdn::CdnError),
}

pub type DepotResult<T> = Result<T, DepotError>;
