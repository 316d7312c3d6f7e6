mod client;
mod error;
mod traits;
mod types;

pub use client::HttpCdnClient;
pub use error::{CdnError, CdnResult};
pub use traits::{CdnClient, TokenSource};
pub use types::{CdnConfig, ChunkRequest, TokenGrant};
