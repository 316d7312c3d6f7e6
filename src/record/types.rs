use crate::record::error::RecordError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallationStatus {
    NotInstalled,
    Downloading,
    Installing,
    Installed,
    ValidationFailed,
    UpdateRequired,
    UpdatePaused,
}

impl InstallationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationStatus::NotInstalled => "NOT_INSTALLED",
            InstallationStatus::Downloading => "DOWNLOADING",
            InstallationStatus::Installing => "INSTALLING",
            InstallationStatus::Installed => "INSTALLED",
            InstallationStatus::ValidationFailed => "VALIDATION_FAILED",
            InstallationStatus::UpdateRequired => "UPDATE_REQUIRED",
            InstallationStatus::UpdatePaused => "UPDATE_PAUSED",
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, InstallationStatus::Installed)
    }

    /// A pipeline is writing to the container
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            InstallationStatus::Downloading | InstallationStatus::Installing
        )
    }
}

impl std::fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallationStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NOT_INSTALLED" => InstallationStatus::NotInstalled,
            "DOWNLOADING" => InstallationStatus::Downloading,
            "INSTALLING" => InstallationStatus::Installing,
            "INSTALLED" => InstallationStatus::Installed,
            "VALIDATION_FAILED" => InstallationStatus::ValidationFailed,
            "UPDATE_REQUIRED" => InstallationStatus::UpdateRequired,
            "UPDATE_PAUSED" => InstallationStatus::UpdatePaused,
            other => return Err(RecordError::InvalidData(format!("unknown status {other}"))),
        })
    }
}

/// Persisted state of one installed (or installing) app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRecord {
    pub id: String,
    pub app_id: u32,
    pub name: String,
    pub status: InstallationStatus,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    /// Root of the emulated container filesystem
    pub container_path: PathBuf,
    /// Main executable, relative to `container_path`
    pub executable_path: PathBuf,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl InstallRecord {
    pub fn new(
        app_id: u32,
        name: impl Into<String>,
        container_path: impl Into<PathBuf>,
        executable_path: impl Into<PathBuf>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_id,
            name: name.into(),
            status: InstallationStatus::NotInstalled,
            bytes_downloaded: 0,
            total_bytes: 0,
            container_path: container_path.into(),
            executable_path: executable_path.into(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn executable(&self) -> PathBuf {
        self.container_path.join(&self.executable_path)
    }

    pub fn progress_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_downloaded as f32 / self.total_bytes as f32) * 100.0
    }
}

/// The only fields the pipeline may write: status, byte progress and error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: Option<InstallationStatus>,
    pub progress: Option<(u64, u64)>,
    /// `Some(None)` clears a previous error
    pub error_message: Option<Option<String>>,
}

impl RecordUpdate {
    pub fn status(status: InstallationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(bytes_downloaded: u64, total_bytes: u64) -> Self {
        Self {
            progress: Some((bytes_downloaded, total_bytes)),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn apply_to(&self, record: &mut InstallRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some((done, total)) = self.progress {
            record.bytes_downloaded = done;
            record.total_bytes = total;
        }
        if let Some(message) = &self.error_message {
            record.error_message = message.clone();
        }
        record.updated_at = chrono::Utc::now().timestamp();
    }
}
