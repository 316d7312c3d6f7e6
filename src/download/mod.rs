pub mod codec;
mod engine;
mod error;
mod rate_limiter;
mod types;

pub use engine::ChunkedDownloadEngine;
pub use error::{DownloadError, DownloadResult};
pub use rate_limiter::BandwidthLimiter;
pub use types::{DepotContext, DownloadConfig, DownloadSummary, FileOutcome, FileReport};
