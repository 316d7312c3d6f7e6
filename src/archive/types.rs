use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A bootstrap installer package on local disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapArchive {
    pub path: PathBuf,
    /// Inner archive to unpack instead of the outer one
    pub nested_entry: Option<String>,
}

impl BootstrapArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            nested_entry: None,
        }
    }

    pub fn with_nested_entry(mut self, entry: impl Into<String>) -> Self {
        self.nested_entry = Some(entry.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Report every Nth entry (the first and last are always reported)
    pub progress_every: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { progress_every: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractProgress {
    pub files_extracted: usize,
    pub total_files: usize,
}

impl ExtractProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_files == 0 {
            return 1.0;
        }
        self.files_extracted as f64 / self.total_files as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files_extracted: usize,
    pub directories: usize,
    pub bytes_written: u64,
}
