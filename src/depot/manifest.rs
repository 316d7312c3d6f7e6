//! Manifest loading and structural validation

use crate::depot::error::{DepotError, DepotResult};
use crate::depot::types::{DepotFile, DepotManifest};
use std::collections::HashSet;

impl DepotManifest {
    /// Parse a manifest document and reject it unless every invariant holds
    pub fn from_json(raw: &[u8]) -> DepotResult<Self> {
        let manifest: DepotManifest = serde_json::from_slice(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check size totals, chunk layout and file names
    pub fn validate(&self) -> DepotResult<()> {
        let mut seen = HashSet::new();
        for file in &self.files {
            validate_filename(&file.filename)?;
            if !seen.insert(file.relative_path()) {
                return Err(DepotError::InvariantViolated(format!(
                    "duplicate file {}",
                    file.filename
                )));
            }
            validate_file(file)?;
        }

        let total_size: u64 = self.files.iter().map(|f| f.size).sum();
        if total_size != self.total_size {
            return Err(DepotError::InvariantViolated(format!(
                "total_size {} != sum of file sizes {}",
                self.total_size, total_size
            )));
        }

        let total_compressed: u64 = self.files.iter().map(|f| f.compressed_size()).sum();
        if total_compressed != self.total_compressed_size {
            return Err(DepotError::InvariantViolated(format!(
                "total_compressed_size {} != sum of chunk sizes {}",
                self.total_compressed_size, total_compressed
            )));
        }

        Ok(())
    }
}

fn validate_filename(filename: &str) -> DepotResult<()> {
    let unsafe_path = || DepotError::UnsafePath(filename.to_string());

    if filename.is_empty() || filename.starts_with(['/', '\\']) {
        return Err(unsafe_path());
    }
    // Drive-qualified paths such as "C:\..."
    if filename.as_bytes().get(1) == Some(&b':') {
        return Err(unsafe_path());
    }
    if filename
        .split(['/', '\\'])
        .any(|part| part == ".." || part == ".")
    {
        return Err(unsafe_path());
    }
    Ok(())
}

fn validate_file(file: &DepotFile) -> DepotResult<()> {
    if file.is_directory() {
        if !file.chunks.is_empty() || file.size != 0 {
            return Err(DepotError::InvariantViolated(format!(
                "directory {} carries data",
                file.filename
            )));
        }
        return Ok(());
    }

    let mut expected_offset = 0u64;
    for chunk in &file.chunks {
        if chunk.offset != expected_offset {
            return Err(DepotError::InvariantViolated(format!(
                "{}: chunk at offset {} leaves a gap or overlap (expected {})",
                file.filename, chunk.offset, expected_offset
            )));
        }
        if chunk.uncompressed_size == 0 {
            return Err(DepotError::InvariantViolated(format!(
                "{}: empty chunk at offset {}",
                file.filename, chunk.offset
            )));
        }
        expected_offset = chunk.end();
    }

    if expected_offset != file.size {
        return Err(DepotError::InvariantViolated(format!(
            "{}: size {} != sum of chunk sizes {}",
            file.filename, file.size, expected_offset
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::types::{ChunkCodec, FileChunk, FLAG_DIRECTORY};

    fn chunk(offset: u64, size: u32) -> FileChunk {
        FileChunk {
            content_hash: [0u8; 20],
            crc32: 0,
            offset,
            uncompressed_size: size,
            compressed_size: size / 2 + 1,
        }
    }

    fn file(name: &str, chunks: Vec<FileChunk>) -> DepotFile {
        DepotFile {
            filename: name.to_string(),
            size: chunks.iter().map(|c| c.uncompressed_size as u64).sum(),
            chunks,
            flags: 0,
        }
    }

    fn manifest(files: Vec<DepotFile>) -> DepotManifest {
        DepotManifest {
            depot_id: 1,
            manifest_id: 2,
            creation_time: 0,
            chunk_codec: ChunkCodec::Lz4,
            total_size: files.iter().map(|f| f.size).sum(),
            total_compressed_size: files.iter().map(|f| f.compressed_size()).sum(),
            files,
        }
    }

    #[test]
    fn test_valid_manifest() {
        let dir = DepotFile {
            filename: "bin".into(),
            size: 0,
            chunks: vec![],
            flags: FLAG_DIRECTORY,
        };
        let m = manifest(vec![
            file("a.txt", vec![chunk(0, 10)]),
            dir,
            file("bin/b.dat", vec![chunk(0, 8), chunk(8, 12)]),
        ]);
        assert!(m.validate().is_ok());
        assert_eq!(m.total_size, 30);
    }

    #[test]
    fn test_total_size_mismatch_rejected() {
        let mut m = manifest(vec![file("a.txt", vec![chunk(0, 10)])]);
        m.total_size = 11;
        assert!(matches!(m.validate(), Err(DepotError::InvariantViolated(_))));
    }

    #[test]
    fn test_compressed_total_mismatch_rejected() {
        let mut m = manifest(vec![file("a.txt", vec![chunk(0, 10)])]);
        m.total_compressed_size += 1;
        assert!(matches!(m.validate(), Err(DepotError::InvariantViolated(_))));
    }

    #[test]
    fn test_chunk_gap_rejected() {
        let mut f = file("a.txt", vec![chunk(0, 10), chunk(12, 10)]);
        f.size = 22;
        let m = manifest(vec![f]);
        assert!(matches!(m.validate(), Err(DepotError::InvariantViolated(_))));
    }

    #[test]
    fn test_chunk_overlap_rejected() {
        let m = manifest(vec![file("a.txt", vec![chunk(0, 10), chunk(5, 5)])]);
        assert!(matches!(m.validate(), Err(DepotError::InvariantViolated(_))));
    }

    #[test]
    fn test_file_size_mismatch_rejected() {
        let mut f = file("a.txt", vec![chunk(0, 10)]);
        f.size = 9;
        let m = manifest(vec![f]);
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_directory_with_chunks_rejected() {
        let mut f = file("bin", vec![chunk(0, 10)]);
        f.flags = FLAG_DIRECTORY;
        let m = manifest(vec![f]);
        assert!(matches!(m.validate(), Err(DepotError::InvariantViolated(_))));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for name in ["../evil", "/etc/passwd", "C:\\Windows\\x.dll", "a/../../b", "\\root", ""] {
            let m = manifest(vec![file(name, vec![chunk(0, 4)])]);
            assert!(
                matches!(m.validate(), Err(DepotError::UnsafePath(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let m = manifest(vec![
            file("a/b.txt", vec![chunk(0, 4)]),
            file("a\\b.txt", vec![chunk(0, 4)]),
        ]);
        assert!(matches!(m.validate(), Err(DepotError::InvariantViolated(_))));
    }

    #[test]
    fn test_from_json_validates() {
        let m = manifest(vec![file("a.txt", vec![chunk(0, 10)])]);
        let mut raw = serde_json::to_value(&m).unwrap();
        raw["total_size"] = serde_json::json!(99);

        let result = DepotManifest::from_json(raw.to_string().as_bytes());
        assert!(matches!(result, Err(DepotError::InvariantViolated(_))));

        let ok = DepotManifest::from_json(serde_json::to_vec(&m).unwrap().as_slice()).unwrap();
        assert_eq!(ok, m);
    }

    #[test]
    fn test_from_json_malformed() {
        let result = DepotManifest::from_json(b"{\"depot_id\": 1");
        assert!(matches!(result, Err(DepotError::Parse(_))));
    }
}
