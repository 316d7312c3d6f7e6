use crate::appstate::error::{AppStateError, AppStateResult};
use crate::appstate::keyvalues::KvSection;
use crate::appstate::types::AppState;
use std::path::Path;
use std::str::FromStr;

/// Reads the state descriptor a guest installer leaves per app
pub struct AppManifestParser;

impl AppManifestParser {
    pub async fn parse(path: &Path) -> AppStateResult<AppState> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppStateError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> AppStateResult<AppState> {
        let root = KvSection::parse(text)?;
        let state = root
            .get_section("AppState")
            .ok_or(AppStateError::MissingKey("AppState"))?;

        let state_flags = state
            .get_str("StateFlags")
            .ok_or(AppStateError::MissingKey("StateFlags"))
            .and_then(|raw| number("StateFlags", raw))?;

        Ok(AppState {
            state_flags,
            app_id: optional(state, "appid")?,
            name: state.get_str("name").map(str::to_string),
            install_dir: state.get_str("installdir").map(str::to_string),
            build_id: optional(state, "buildid")?,
            size_on_disk: optional(state, "SizeOnDisk")?,
            bytes_to_download: optional(state, "BytesToDownload")?,
            bytes_downloaded: optional(state, "BytesDownloaded")?,
        })
    }
}

fn number<T: FromStr>(key: &'static str, raw: &str) -> AppStateResult<T> {
    raw.trim().parse().map_err(|_| AppStateError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn optional<T: FromStr>(section: &KvSection, key: &'static str) -> AppStateResult<Option<T>> {
    section.get_str(key).map(|raw| number(key, raw)).transpose()
}
