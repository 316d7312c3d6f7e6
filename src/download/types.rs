use crate::depot::{ChunkCodec, DepotManifest};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

const KIB: usize = 1024;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Files at or above this size use the large buffer and progress interval
    pub large_file_threshold: u64,
    pub small_write_buffer: usize,
    pub large_write_buffer: usize,
    pub small_progress_interval: u64,
    pub large_progress_interval: u64,
    /// Applied per chunk to network failures and verification mismatches
    pub retry: RetryPolicy,
    /// Files downloaded in parallel (clamped to 1..=4)
    pub max_concurrent_files: usize,
    /// 0 = unlimited
    pub max_bytes_per_second: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: 10 * MIB,
            small_write_buffer: 64 * KIB,
            large_write_buffer: 128 * KIB,
            small_progress_interval: 128 * KIB as u64,
            large_progress_interval: 512 * KIB as u64,
            retry: RetryPolicy::default(),
            max_concurrent_files: 1,
            max_bytes_per_second: 0,
        }
    }
}

impl DownloadConfig {
    pub fn write_buffer_for(&self, size: u64) -> usize {
        if size >= self.large_file_threshold {
            self.large_write_buffer
        } else {
            self.small_write_buffer
        }
    }

    pub fn progress_interval_for(&self, size: u64) -> u64 {
        if size >= self.large_file_threshold {
            self.large_progress_interval
        } else {
            self.small_progress_interval
        }
    }

    pub fn workers(&self) -> usize {
        self.max_concurrent_files.clamp(1, 4)
    }
}

/// Identifies where a file's chunks live on the CDN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepotContext {
    pub app_id: u32,
    pub depot_id: u32,
    pub codec: ChunkCodec,
}

impl DepotContext {
    pub fn for_manifest(app_id: u32, manifest: &DepotManifest) -> Self {
        Self {
            app_id,
            depot_id: manifest.depot_id,
            codec: manifest.chunk_codec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Every chunk fetched from the CDN
    Downloaded,
    /// A verified prefix was kept and the rest fetched
    Resumed,
    /// Already complete on disk
    Skipped,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReport {
    pub outcome: FileOutcome,
    /// Uncompressed bytes fetched over the network
    pub bytes_fetched: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub files_downloaded: usize,
    pub files_resumed: usize,
    pub files_skipped: usize,
    pub directories: usize,
    pub bytes_fetched: u64,
    pub total_bytes: u64,
}

impl DownloadSummary {
    pub(crate) fn add(&mut self, report: FileReport) {
        match report.outcome {
            FileOutcome::Downloaded => self.files_downloaded += 1,
            FileOutcome::Resumed => self.files_resumed += 1,
            FileOutcome::Skipped => self.files_skipped += 1,
            FileOutcome::Directory => self.directories += 1,
        }
        self.bytes_fetched += report.bytes_fetched;
    }
}
