use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::types::{BootstrapArchive, ExtractConfig, ExtractProgress, ExtractSummary};
use crate::progress::{emit, ProgressSender};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

const COPY_BUFFER: usize = 64 * 1024;

/// Unpacks bootstrap installer archives entry by entry
pub struct BootstrapArchiveExtractor {
    config: ExtractConfig,
}

impl BootstrapArchiveExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Extract `archive` into `destination`.
    ///
    /// All entry names are checked before anything is written; one entry
    /// resolving outside `destination` rejects the whole archive.
    /// Cancellation is honored between entries.
    pub async fn extract(
        &self,
        archive: &BootstrapArchive,
        destination: &Path,
        progress: &ProgressSender<ExtractProgress>,
        cancel: &CancellationToken,
    ) -> ArchiveResult<ExtractSummary> {
        let archive = archive.clone();
        let destination = destination.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();
        let every = self.config.progress_every.max(1);

        tokio::task::spawn_blocking(move || {
            extract_blocking(&archive, &destination, &progress, &cancel, every)
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
    }
}

fn extract_blocking(
    archive: &BootstrapArchive,
    destination: &Path,
    progress: &ProgressSender<ExtractProgress>,
    cancel: &CancellationToken,
    every: usize,
) -> ArchiveResult<ExtractSummary> {
    let file = File::open(&archive.path)?;
    let mut outer = ZipArchive::new(BufReader::new(file))?;

    let summary = match &archive.nested_entry {
        None => unpack(&mut outer, destination, progress, cancel, every)?,
        Some(name) => {
            let mut payload = Vec::new();
            {
                let mut entry = match outer.by_name(name) {
                    Ok(entry) => entry,
                    Err(zip::result::ZipError::FileNotFound) => {
                        return Err(ArchiveError::NestedEntryMissing(name.clone()))
                    }
                    Err(e) => return Err(e.into()),
                };
                entry
                    .read_to_end(&mut payload)
                    .map_err(|e| ArchiveError::Corrupt(format!("{}: {}", name, e)))?;
            }
            let mut inner = ZipArchive::new(Cursor::new(payload))?;
            unpack(&mut inner, destination, progress, cancel, every)?
        }
    };

    tracing::info!(
        archive = %archive.path.display(),
        entries = summary.files_extracted,
        bytes = summary.bytes_written,
        "Bootstrap archive extracted"
    );
    Ok(summary)
}

fn unpack<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    destination: &Path,
    progress: &ProgressSender<ExtractProgress>,
    cancel: &CancellationToken,
    every: usize,
) -> ArchiveResult<ExtractSummary> {
    let total = archive.len();
    let targets = resolve_targets(archive, destination)?;

    std::fs::create_dir_all(destination)?;

    let mut summary = ExtractSummary::default();
    let mut buffer = vec![0u8; COPY_BUFFER];

    for (index, target) in targets.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled {
                files_extracted: summary.files_extracted,
            });
        }

        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            summary.directories += 1;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            loop {
                let n = entry
                    .read(&mut buffer)
                    .map_err(|e| ArchiveError::Corrupt(format!("{}: {}", name, e)))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buffer[..n])?;
                summary.bytes_written += n as u64;
            }
            out.flush()?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }

        summary.files_extracted += 1;
        let count = summary.files_extracted;
        if count == 1 || count % every == 0 || count == total {
            emit(
                progress,
                ExtractProgress {
                    files_extracted: count,
                    total_files: total,
                },
            );
        }
    }

    Ok(summary)
}

/// Map every entry to its path below `destination`, rejecting the archive if
/// any entry would land outside it
fn resolve_targets<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    destination: &Path,
) -> ArchiveResult<Vec<PathBuf>> {
    let mut targets = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        match entry.enclosed_name() {
            Some(relative) => targets.push(destination.join(relative)),
            None => return Err(ArchiveError::PathTraversal(entry.name().to_string())),
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{progress_channel, ProgressReceiver};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, mode) in entries {
            let options = SimpleFileOptions::default().unix_permissions(*mode);
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn drain(rx: &mut ProgressReceiver<ExtractProgress>) -> Vec<usize> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p.files_extracted);
        }
        out
    }

    fn extractor() -> BootstrapArchiveExtractor {
        BootstrapArchiveExtractor::new(ExtractConfig::default())
    }

    #[tokio::test]
    async fn test_extract_with_progress_cadence() {
        let dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("data/file{i}.txt")).collect();
        let entries: Vec<(&str, &[u8], u32)> = names
            .iter()
            .map(|n| (n.as_str(), n.as_bytes(), 0o644))
            .collect();
        let zip_path = dir.path().join("setup.zip");
        std::fs::write(&zip_path, build_zip(&entries)).unwrap();

        let dest = dir.path().join("out");
        let (tx, mut rx) = progress_channel();
        let summary = extractor()
            .extract(&BootstrapArchive::new(&zip_path), &dest, &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.files_extracted, 12);
        assert_eq!(
            std::fs::read_to_string(dest.join("data/file7.txt")).unwrap(),
            "data/file7.txt"
        );
        assert_eq!(drain(&mut rx), vec![1, 5, 10, 12]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_bit_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("setup.zip");
        std::fs::write(
            &zip_path,
            build_zip(&[("bin/", b"", 0o755), ("bin/setup", b"#!", 0o755), ("readme", b"hi", 0o644)]),
        )
        .unwrap();

        let dest = dir.path().join("out");
        let (tx, _rx) = progress_channel();
        extractor()
            .extract(&BootstrapArchive::new(&zip_path), &dest, &tx, &CancellationToken::new())
            .await
            .unwrap();

        let exec = std::fs::metadata(dest.join("bin/setup")).unwrap().permissions().mode();
        let plain = std::fs::metadata(dest.join("readme")).unwrap().permissions().mode();
        assert_eq!(exec & 0o111, 0o111);
        assert_eq!(plain & 0o111, 0);
    }

    #[tokio::test]
    async fn test_path_traversal_rejects_whole_archive() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("evil.zip");
        std::fs::write(
            &zip_path,
            build_zip(&[("good.txt", b"ok", 0o644), ("../escape.txt", b"bad", 0o644)]),
        )
        .unwrap();

        let dest = dir.path().join("out");
        let (tx, _rx) = progress_channel();
        let result = extractor()
            .extract(&BootstrapArchive::new(&zip_path), &dest, &tx, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ArchiveError::PathTraversal(_))));
        assert!(!dest.join("good.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_nested_payload_and_stub() {
        let dir = TempDir::new().unwrap();
        let inner = build_zip(&[("steam.exe", b"MZ", 0o755), ("package/a.pkg", b"pkg", 0o644)]);
        let outer = build_zip(&[("payload.zip", &inner, 0o644), ("notes.txt", b"x", 0o644)]);

        // Self-extracting stub: executable code precedes the archive
        let mut bytes = b"MZ-stub-code".repeat(64);
        bytes.extend_from_slice(&outer);
        let zip_path = dir.path().join("setup.exe");
        std::fs::write(&zip_path, bytes).unwrap();

        let dest = dir.path().join("out");
        let (tx, _rx) = progress_channel();
        let archive = BootstrapArchive::new(&zip_path).with_nested_entry("payload.zip");
        let summary = extractor()
            .extract(&archive, &dest, &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.files_extracted, 2);
        assert!(dest.join("steam.exe").exists());
        assert!(dest.join("package/a.pkg").exists());
        assert!(!dest.join("notes.txt").exists());

        let missing = BootstrapArchive::new(&zip_path).with_nested_entry("other.zip");
        let result = extractor()
            .extract(&missing, &dest, &tx, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ArchiveError::NestedEntryMissing(_))));
    }

    #[tokio::test]
    async fn test_not_an_archive_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("setup.zip");
        std::fs::write(&zip_path, b"definitely not a zip file").unwrap();

        let (tx, _rx) = progress_channel();
        let result = extractor()
            .extract(&BootstrapArchive::new(&zip_path), dir.path(), &tx, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("setup.zip");
        std::fs::write(&zip_path, build_zip(&[("a", b"a", 0o644)])).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = progress_channel();
        let result = extractor()
            .extract(&BootstrapArchive::new(&zip_path), &dir.path().join("out"), &tx, &cancel)
            .await;
        assert!(matches!(result, Err(ArchiveError::Cancelled { files_extracted: 0 })));
    }
}
