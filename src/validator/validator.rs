use crate::appstate::{AppManifestParser, AppStateError};
use crate::record::InstallRecord;
use crate::validator::types::{
    GuestInstallState, ValidationError, ValidationReport, ValidatorConfig,
};
use std::path::{Path, PathBuf};

/// Decides whether an installation is launchable.
///
/// Runs every check and reports every failure; nothing short-circuits.
/// Call it again before each launch since guest files can disappear after
/// a successful install.
pub struct InstallationValidator {
    config: ValidatorConfig,
}

impl InstallationValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Path of the guest state file for `record`
    pub fn state_file(&self, record: &InstallRecord) -> PathBuf {
        record
            .container_path
            .join(&self.config.state_dir)
            .join(ValidatorConfig::state_file_name(record.app_id))
    }

    pub async fn validate(&self, record: &InstallRecord) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Some(error) = self.check_executable(record).await {
            report.errors.push(error);
        }
        if let Some(error) = self.check_guest_state(record).await {
            report.errors.push(error);
        }
        report.errors.extend(self.check_libraries(record).await);

        if report.is_valid() {
            tracing::debug!(record_id = %record.id, "Installation valid");
        } else {
            tracing::warn!(
                record_id = %record.id,
                app_id = record.app_id,
                errors = report.errors.len(),
                "Installation invalid: {}",
                report.summary()
            );
        }
        report
    }

    async fn check_executable(&self, record: &InstallRecord) -> Option<ValidationError> {
        let path = record.executable();
        if is_file(&path).await {
            None
        } else {
            Some(ValidationError::ExecutableMissing { path })
        }
    }

    async fn check_guest_state(&self, record: &InstallRecord) -> Option<ValidationError> {
        let path = self.state_file(record);
        let state = match AppManifestParser::parse(&path).await {
            Ok(state) => state,
            Err(AppStateError::Missing(path)) => {
                return Some(ValidationError::StateFileMissing { path })
            }
            Err(e) => {
                return Some(ValidationError::StateFileInvalid {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        match self.config.state_flags.interpret(state.state_flags) {
            GuestInstallState::FullyInstalled => None,
            other => Some(ValidationError::StateNotReady {
                flags: state.state_flags,
                state: other,
            }),
        }
    }

    async fn check_libraries(&self, record: &InstallRecord) -> Vec<ValidationError> {
        let dir = record.container_path.join(&self.config.library_dir);
        let mut missing = Vec::new();
        for name in &self.config.required_libraries {
            if !is_file(&dir.join(name)).await {
                missing.push(ValidationError::LibraryMissing { name: name.clone() });
            }
        }
        missing
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const APP: u32 = 228980;

    struct Fixture {
        dir: TempDir,
        validator: InstallationValidator,
        record: InstallRecord,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let record = InstallRecord::new(APP, "Game", dir.path(), "drive_c/Games/game/game.exe");
        Fixture {
            dir,
            validator: InstallationValidator::new(ValidatorConfig::default()),
            record,
        }
    }

    impl Fixture {
        fn write(&self, relative: &Path, contents: &str) {
            let path = self.dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }

        fn install_executable(&self) {
            self.write(&self.record.executable_path, "MZ");
        }

        fn install_state(&self, flags: u32) {
            let config = self.validator.config();
            self.write(
                &config.state_dir.join(ValidatorConfig::state_file_name(APP)),
                &format!("\"AppState\"\n{{\n\t\"appid\"\t\"{APP}\"\n\t\"StateFlags\"\t\"{flags}\"\n}}\n"),
            );
        }

        fn install_libraries(&self) {
            let config = self.validator.config();
            for lib in &config.required_libraries {
                self.write(&config.library_dir.join(lib), "lib");
            }
        }
    }

    #[tokio::test]
    async fn test_valid_installation() {
        let f = fixture();
        f.install_executable();
        f.install_state(4);
        f.install_libraries();

        let report = f.validator.validate(&f.record).await;
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[tokio::test]
    async fn test_state_not_ready_is_single_error() {
        let f = fixture();
        f.install_executable();
        f.install_state(2);
        f.install_libraries();

        let report = f.validator.validate(&f.record).await;
        assert!(!report.is_valid());
        assert_eq!(
            report.errors,
            vec![ValidationError::StateNotReady {
                flags: 2,
                state: GuestInstallState::Downloading
            }]
        );
    }

    #[tokio::test]
    async fn test_all_failures_accumulate() {
        let f = fixture();

        let report = f.validator.validate(&f.record).await;
        assert_eq!(report.errors.len(), 5);
        assert!(matches!(report.errors[0], ValidationError::ExecutableMissing { .. }));
        assert!(matches!(report.errors[1], ValidationError::StateFileMissing { .. }));
        assert!(report.errors[2..]
            .iter()
            .all(|e| matches!(e, ValidationError::LibraryMissing { .. })));
    }

    #[tokio::test]
    async fn test_malformed_state_file() {
        let f = fixture();
        f.install_executable();
        f.install_libraries();
        f.write(
            &f.validator
                .config()
                .state_dir
                .join(ValidatorConfig::state_file_name(APP)),
            "\"AppState\" { \"StateFlags\" ",
        );

        let report = f.validator.validate(&f.record).await;
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], ValidationError::StateFileInvalid { .. }));
    }

    #[tokio::test]
    async fn test_deeply_nested_state_file_is_invalid() {
        let f = fixture();
        f.install_executable();
        f.install_libraries();
        f.write(
            &f.validator
                .config()
                .state_dir
                .join(ValidatorConfig::state_file_name(APP)),
            &"\"AppState\" {".repeat(100_000),
        );

        let report = f.validator.validate(&f.record).await;
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], ValidationError::StateFileInvalid { .. }));
    }

    #[tokio::test]
    async fn test_regression_after_install_is_detected() {
        let f = fixture();
        f.install_executable();
        f.install_state(4);
        f.install_libraries();
        assert!(f.validator.validate(&f.record).await.is_valid());

        std::fs::remove_file(f.record.executable()).unwrap();
        let report = f.validator.validate(&f.record).await;
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], ValidationError::ExecutableMissing { .. }));
    }

    #[tokio::test]
    async fn test_custom_flag_mapping() {
        let f = fixture();
        f.install_executable();
        f.install_state(1028);
        f.install_libraries();

        let mut config = ValidatorConfig::default();
        config.state_flags.fully_installed = 1028;
        let validator = InstallationValidator::new(config);

        assert!(validator.validate(&f.record).await.is_valid());
    }
}
