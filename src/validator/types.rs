use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Guest-defined StateFlags values.
///
/// The guest product owns these numbers; a new `version` of the mapping can
/// be shipped in config without code changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateFlagsMapping {
    pub version: u32,
    pub update_required: u32,
    pub downloading: u32,
    pub fully_installed: u32,
    pub update_paused: u32,
}

impl Default for StateFlagsMapping {
    fn default() -> Self {
        Self {
            version: 1,
            update_required: 1,
            downloading: 2,
            fully_installed: 4,
            update_paused: 6,
        }
    }
}

impl StateFlagsMapping {
    pub fn interpret(&self, flags: u32) -> GuestInstallState {
        if flags == self.fully_installed {
            GuestInstallState::FullyInstalled
        } else if flags == self.update_paused {
            GuestInstallState::UpdatePaused
        } else if flags == self.downloading {
            GuestInstallState::Downloading
        } else if flags == self.update_required {
            GuestInstallState::UpdateRequired
        } else {
            GuestInstallState::Unknown(flags)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuestInstallState {
    UpdateRequired,
    Downloading,
    FullyInstalled,
    UpdatePaused,
    Unknown(u32),
}

impl std::fmt::Display for GuestInstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuestInstallState::UpdateRequired => write!(f, "update required"),
            GuestInstallState::Downloading => write!(f, "downloading"),
            GuestInstallState::FullyInstalled => write!(f, "fully installed"),
            GuestInstallState::UpdatePaused => write!(f, "update paused"),
            GuestInstallState::Unknown(flags) => write!(f, "unknown state {}", flags),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Libraries that must exist in `library_dir`
    pub required_libraries: Vec<String>,
    /// Guest library directory, relative to the container root
    pub library_dir: PathBuf,
    /// Directory holding per-app state files, relative to the container root
    pub state_dir: PathBuf,
    pub state_flags: StateFlagsMapping,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            required_libraries: vec![
                "steamclient.dll".to_string(),
                "tier0_s.dll".to_string(),
                "vstdlib_s.dll".to_string(),
            ],
            library_dir: PathBuf::from("drive_c/Program Files (x86)/Steam"),
            state_dir: PathBuf::from("drive_c/Program Files (x86)/Steam/steamapps"),
            state_flags: StateFlagsMapping::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn state_file_name(app_id: u32) -> String {
        format!("appmanifest_{}.acf", app_id)
    }
}

/// One failed readiness check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    ExecutableMissing { path: PathBuf },
    StateFileMissing { path: PathBuf },
    StateFileInvalid { path: PathBuf, reason: String },
    StateNotReady { flags: u32, state: GuestInstallState },
    LibraryMissing { name: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::ExecutableMissing { path } => {
                write!(f, "executable missing: {}", path.display())
            }
            ValidationError::StateFileMissing { path } => {
                write!(f, "state file missing: {}", path.display())
            }
            ValidationError::StateFileInvalid { path, reason } => {
                write!(f, "state file {} invalid: {}", path.display(), reason)
            }
            ValidationError::StateNotReady { flags, state } => {
                write!(f, "guest reports StateFlags={} ({})", flags, state)
            }
            ValidationError::LibraryMissing { name } => write!(f, "required library missing: {}", name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All errors joined into one line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let mapping = StateFlagsMapping::default();
        assert_eq!(mapping.interpret(4), GuestInstallState::FullyInstalled);
        assert_eq!(mapping.interpret(2), GuestInstallState::Downloading);
        assert_eq!(mapping.interpret(1), GuestInstallState::UpdateRequired);
        assert_eq!(mapping.interpret(6), GuestInstallState::UpdatePaused);
        assert_eq!(mapping.interpret(1026), GuestInstallState::Unknown(1026));
    }

    #[test]
    fn test_remapped_flags() {
        let mapping = StateFlagsMapping {
            version: 2,
            fully_installed: 1028,
            ..Default::default()
        };
        assert_eq!(mapping.interpret(1028), GuestInstallState::FullyInstalled);
        assert_eq!(mapping.interpret(4), GuestInstallState::Unknown(4));
    }
}
