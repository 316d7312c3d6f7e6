use crate::config::serde_millis;
use crate::depot::DEFAULT_BRANCH;
use crate::pipeline::error::{ErrorKind, PipelineError, PipelineResult};
use crate::record::InstallationStatus;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Initializing,
    PreparingContainer,
    FetchingBootstrap,
    /// First half of the content state: bootstrap extraction, [.50, .60]
    Unpacking,
    /// Second half of the content state: per-file downloads, [.60, .90].
    /// Kept as its own stage so each half has its own timeout and failure
    /// stage while the pair still owns [.50, .90] of overall progress.
    FetchingContent,
    Verifying,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Initializing,
        PipelineStage::PreparingContainer,
        PipelineStage::FetchingBootstrap,
        PipelineStage::Unpacking,
        PipelineStage::FetchingContent,
        PipelineStage::Verifying,
    ];

    pub fn next(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Initializing => Some(PipelineStage::PreparingContainer),
            PipelineStage::PreparingContainer => Some(PipelineStage::FetchingBootstrap),
            PipelineStage::FetchingBootstrap => Some(PipelineStage::Unpacking),
            PipelineStage::Unpacking => Some(PipelineStage::FetchingContent),
            PipelineStage::FetchingContent => Some(PipelineStage::Verifying),
            PipelineStage::Verifying => None,
        }
    }

    /// Slice of overall progress owned by this stage
    pub fn range(self) -> ProgressRange {
        match self {
            PipelineStage::Initializing => ProgressRange::new(0.0, 0.25),
            PipelineStage::PreparingContainer => ProgressRange::new(0.25, 0.40),
            PipelineStage::FetchingBootstrap => ProgressRange::new(0.40, 0.50),
            PipelineStage::Unpacking => ProgressRange::new(0.50, 0.60),
            PipelineStage::FetchingContent => ProgressRange::new(0.60, 0.90),
            PipelineStage::Verifying => ProgressRange::new(0.90, 1.0),
        }
    }

    /// Record status while this stage runs
    pub fn status(self) -> InstallationStatus {
        match self {
            PipelineStage::FetchingBootstrap | PipelineStage::FetchingContent => {
                InstallationStatus::Downloading
            }
            _ => InstallationStatus::Installing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Initializing => "initializing",
            PipelineStage::PreparingContainer => "preparing_container",
            PipelineStage::FetchingBootstrap => "fetching_bootstrap",
            PipelineStage::Unpacking => "unpacking",
            PipelineStage::FetchingContent => "fetching_content",
            PipelineStage::Verifying => "verifying",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Map stage-local progress in [0, 1] into overall progress
    pub fn map(&self, local: f64) -> f64 {
        let local = if local.is_nan() { 0.0 } else { local.clamp(0.0, 1.0) };
        self.start + local * (self.end - self.start)
    }
}

/// Externally observable pipeline state
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Pending,
    Running(PipelineStage),
    Completed,
    Failed { stage: PipelineStage, reason: String },
}

impl PipelineState {
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineState::Running(stage) => Some(*stage),
            PipelineState::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineTransition {
    Start,
    /// Current stage finished successfully
    Advance,
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: PipelineStage,
    },
    Progress {
        stage: PipelineStage,
        overall: f64,
    },
    StageCompleted {
        stage: PipelineStage,
    },
    Completed {
        record_id: String,
    },
    Failed {
        stage: PipelineStage,
        kind: ErrorKind,
        reason: String,
    },
}

/// Bootstrap installer shipped as a file inside a depot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSource {
    pub depot_id: u32,
    pub filename: String,
    /// Inner archive to unpack instead of the downloaded file itself
    pub nested_entry: Option<String>,
    /// Extraction target, relative to the container root
    pub extract_to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Existing install record; supplies app id, container and executable
    pub record_id: String,
    pub content_depot: u32,
    pub branch: String,
    /// Content destination, relative to the container root
    pub install_dir: PathBuf,
    pub bootstrap: Option<BootstrapSource>,
}

impl InstallRequest {
    pub fn new(record_id: impl Into<String>, content_depot: u32, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            record_id: record_id.into(),
            content_depot,
            branch: DEFAULT_BRANCH.to_string(),
            install_dir: install_dir.into(),
            bootstrap: None,
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapSource) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Target directories must stay inside the container
    pub fn validate(&self) -> PipelineResult<()> {
        if self.branch.is_empty() {
            return Err(PipelineError::InvalidRequest("empty branch".into()));
        }
        if !is_contained(&self.install_dir) {
            return Err(PipelineError::InvalidRequest(format!(
                "install_dir {} leaves the container",
                self.install_dir.display()
            )));
        }
        if let Some(bootstrap) = &self.bootstrap {
            if !is_contained(&bootstrap.extract_to) {
                return Err(PipelineError::InvalidRequest(format!(
                    "extract_to {} leaves the container",
                    bootstrap.extract_to.display()
                )));
            }
        }
        Ok(())
    }
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Wall-clock limits per stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(with = "serde_millis")]
    pub initializing_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub preparing_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub bootstrap_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub unpacking_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub content_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub verifying_timeout: Duration,
    /// How long a timed-out stage may take to stop at its next checkpoint
    /// before it is abandoned
    #[serde(with = "serde_millis")]
    pub stop_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initializing_timeout: Duration::from_secs(10 * 60),
            preparing_timeout: Duration::from_secs(2 * 60),
            bootstrap_timeout: Duration::from_secs(15 * 60),
            unpacking_timeout: Duration::from_secs(10 * 60),
            content_timeout: Duration::from_secs(12 * 60 * 60),
            verifying_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn timeout_for(&self, stage: PipelineStage) -> Duration {
        match stage {
            PipelineStage::Initializing => self.initializing_timeout,
            PipelineStage::PreparingContainer => self.preparing_timeout,
            PipelineStage::FetchingBootstrap => self.bootstrap_timeout,
            PipelineStage::Unpacking => self.unpacking_timeout,
            PipelineStage::FetchingContent => self.content_timeout,
            PipelineStage::Verifying => self.verifying_timeout,
        }
    }
}
