use crate::depot::{DepotFile, FileChunk};
use crate::integrity::error::{IntegrityError, IntegrityResult};
use crate::integrity::types::VerifiedPrefix;
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::io::{AsyncReadExt, BufReader};

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Calculate SHA-1 digest for byte slice
    pub fn calculate_sha1(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }

    pub fn calculate_crc32(data: &[u8]) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        crc.sum()
    }

    /// Verify decompressed chunk bytes against the manifest entry
    pub fn verify_chunk(data: &[u8], chunk: &FileChunk) -> IntegrityResult<()> {
        if data.len() as u64 != chunk.uncompressed_size as u64 {
            return Err(IntegrityError::LengthMismatch {
                offset: chunk.offset,
                expected: chunk.uncompressed_size as u64,
                actual: data.len() as u64,
            });
        }

        let sha1 = Self::calculate_sha1(data);
        if sha1 != chunk.content_hash {
            return Err(IntegrityError::Sha1Mismatch {
                offset: chunk.offset,
                expected: hex::encode(chunk.content_hash),
                actual: hex::encode(sha1),
            });
        }

        let crc = Self::calculate_crc32(data);
        if crc != chunk.crc32 {
            return Err(IntegrityError::Crc32Mismatch {
                offset: chunk.offset,
                expected: chunk.crc32,
                actual: crc,
            });
        }

        Ok(())
    }

    /// Count the leading chunks of `file` that are already correct on disk.
    ///
    /// Stops at the first chunk that is short or fails verification. A
    /// missing file yields an empty prefix.
    pub async fn verified_prefix(path: &Path, file: &DepotFile) -> IntegrityResult<VerifiedPrefix> {
        let handle = match tokio::fs::File::open(path).await {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VerifiedPrefix::default())
            }
            Err(e) => return Err(e.into()),
        };

        let on_disk = handle.metadata().await?.len();
        let mut reader = BufReader::new(handle);
        let mut prefix = VerifiedPrefix {
            file_len: Some(on_disk),
            ..VerifiedPrefix::default()
        };
        let mut buffer = Vec::new();

        for chunk in &file.chunks {
            if chunk.end() > on_disk {
                break;
            }

            buffer.resize(chunk.uncompressed_size as usize, 0);
            reader.read_exact(&mut buffer).await?;

            if Self::verify_chunk(&buffer, chunk).is_err() {
                break;
            }
            prefix.chunks += 1;
            prefix.bytes = chunk.end();
        }

        Ok(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk_for(data: &[u8], offset: u64) -> FileChunk {
        FileChunk {
            content_hash: IntegrityVerifier::calculate_sha1(data),
            crc32: IntegrityVerifier::calculate_crc32(data),
            offset,
            uncompressed_size: data.len() as u32,
            compressed_size: data.len() as u32,
        }
    }

    fn file_for(parts: &[&[u8]]) -> DepotFile {
        let mut offset = 0;
        let chunks = parts
            .iter()
            .map(|p| {
                let c = chunk_for(p, offset);
                offset += p.len() as u64;
                c
            })
            .collect();
        DepotFile {
            filename: "data.bin".into(),
            size: offset,
            chunks,
            flags: 0,
        }
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hex::encode(IntegrityVerifier::calculate_sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(IntegrityVerifier::calculate_crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn test_chunk_verification_success() {
        let data = b"test data";
        let chunk = chunk_for(data, 0);
        assert!(IntegrityVerifier::verify_chunk(data, &chunk).is_ok());
    }

    #[test]
    fn test_chunk_verification_failures() {
        let data = b"test data";
        let mut chunk = chunk_for(data, 0);

        let result = IntegrityVerifier::verify_chunk(b"test", &chunk);
        assert!(matches!(result, Err(IntegrityError::LengthMismatch { .. })));

        let result = IntegrityVerifier::verify_chunk(b"best data", &chunk);
        assert!(matches!(result, Err(IntegrityError::Sha1Mismatch { .. })));

        chunk.crc32 ^= 1;
        let result = IntegrityVerifier::verify_chunk(data, &chunk);
        assert!(matches!(result, Err(IntegrityError::Crc32Mismatch { .. })));
    }

    #[tokio::test]
    async fn test_verified_prefix_missing_file() {
        let dir = TempDir::new().unwrap();
        let file = file_for(&[b"aaaa", b"bbbb"]);

        let prefix = IntegrityVerifier::verified_prefix(&dir.path().join("none"), &file)
            .await
            .unwrap();
        assert_eq!(prefix, VerifiedPrefix::default());
    }

    #[tokio::test]
    async fn test_verified_prefix_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let file = file_for(&[b"aaaa", b"bbbb", b"cccc"]);

        // Second chunk complete, third only half written
        tokio::fs::write(&path, b"aaaabbbbcc").await.unwrap();
        let prefix = IntegrityVerifier::verified_prefix(&path, &file).await.unwrap();
        assert_eq!(
            prefix,
            VerifiedPrefix {
                chunks: 2,
                bytes: 8,
                file_len: Some(10)
            }
        );
        assert!(!prefix.covers(&file));
    }

    #[tokio::test]
    async fn test_verified_prefix_stops_at_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let file = file_for(&[b"aaaa", b"bbbb", b"cccc"]);

        tokio::fs::write(&path, b"aaaaXbbbcccc").await.unwrap();
        let prefix = IntegrityVerifier::verified_prefix(&path, &file).await.unwrap();
        assert_eq!((prefix.chunks, prefix.bytes), (1, 4));
        assert!(!prefix.covers(&file));
    }

    #[tokio::test]
    async fn test_verify_complete_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let file = file_for(&[b"aaaa", b"bbbb"]);

        tokio::fs::write(&path, b"aaaabbbb").await.unwrap();
        let prefix = IntegrityVerifier::verified_prefix(&path, &file).await.unwrap();
        assert!(prefix.covers(&file));

        // Trailing bytes beyond the declared size fail the check
        tokio::fs::write(&path, b"aaaabbbbzz").await.unwrap();
        let prefix = IntegrityVerifier::verified_prefix(&path, &file).await.unwrap();
        assert_eq!(prefix.chunks, 2);
        assert!(!prefix.covers(&file));
    }

    #[tokio::test]
    async fn test_missing_empty_file_is_not_covered() {
        let dir = TempDir::new().unwrap();
        let file = file_for(&[]);

        let path = dir.path().join("empty.bin");
        let prefix = IntegrityVerifier::verified_prefix(&path, &file).await.unwrap();
        assert!(!prefix.covers(&file));

        tokio::fs::write(&path, b"").await.unwrap();
        let prefix = IntegrityVerifier::verified_prefix(&path, &file).await.unwrap();
        assert!(prefix.covers(&file));
    }
}
