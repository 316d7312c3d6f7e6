//! Metrics and observability module
//!
//! Key metrics exposed:
//! - Chunk verification and retries
//! - Bytes downloaded and files skipped on resume
//! - Pipeline runs started/completed/failed
//! - Stage durations

pub mod recorder;

pub use recorder::{
    init_metrics, record_chunk_retry, record_chunk_verified, record_file_skipped,
    record_stage_duration, InstallMetrics,
};
