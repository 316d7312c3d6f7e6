use serde::{Deserialize, Serialize};

/// Fields read from a guest app state descriptor.
///
/// `state_flags` is reported as written by the guest; its meaning is
/// decided by the validator's flag mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub state_flags: u32,
    pub app_id: Option<u32>,
    pub name: Option<String>,
    pub install_dir: Option<String>,
    pub build_id: Option<u64>,
    pub size_on_disk: Option<u64>,
    pub bytes_to_download: Option<u64>,
    pub bytes_downloaded: Option<u64>,
}
