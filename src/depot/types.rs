use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const FLAG_EXECUTABLE: u32 = 0x01;
pub const FLAG_DIRECTORY: u32 = 0x10;

/// Compression applied to chunk payloads on the CDN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCodec {
    None,
    #[default]
    Lz4,
}

/// Independently verifiable unit of transfer within a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    #[serde(with = "sha1_hex")]
    pub content_hash: [u8; 20],
    pub crc32: u32,
    pub offset: u64,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

impl FileChunk {
    /// Offset one past the last byte of this chunk
    pub fn end(&self) -> u64 {
        self.offset + self.uncompressed_size as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotFile {
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub chunks: Vec<FileChunk>,
    #[serde(default)]
    pub flags: u32,
}

impl DepotFile {
    pub fn is_executable(&self) -> bool {
        self.flags & FLAG_EXECUTABLE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    pub fn compressed_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.compressed_size as u64).sum()
    }

    /// Path below the container; manifests may use either separator
    pub fn relative_path(&self) -> PathBuf {
        self.filename
            .split(['/', '\\'])
            .filter(|part| !part.is_empty())
            .collect()
    }
}

/// Immutable description of one depot revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotManifest {
    pub depot_id: u32,
    pub manifest_id: u64,
    pub creation_time: i64,
    #[serde(default)]
    pub chunk_codec: ChunkCodec,
    pub files: Vec<DepotFile>,
    pub total_size: u64,
    pub total_compressed_size: u64,
}

impl DepotManifest {
    pub fn file(&self, filename: &str) -> Option<&DepotFile> {
        self.files.iter().find(|f| f.filename == filename)
    }

    pub fn directories(&self) -> impl Iterator<Item = &DepotFile> {
        self.files.iter().filter(|f| f.is_directory())
    }

    pub fn regular_files(&self) -> impl Iterator<Item = &DepotFile> {
        self.files.iter().filter(|f| !f.is_directory())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub manifest_id: u64,
    pub size: u64,
    pub download_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotInfo {
    pub depot_id: u32,
    #[serde(default)]
    pub name: String,
    /// Current manifest per branch
    pub manifests: HashMap<String, ManifestInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: u32,
    pub name: String,
    pub depots: Vec<DepotInfo>,
}

impl AppInfo {
    pub fn depot(&self, depot_id: u32) -> Option<&DepotInfo> {
        self.depots.iter().find(|d| d.depot_id == depot_id)
    }
}

mod sha1_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(hash: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 20], D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(&raw).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 20-byte SHA-1, got {} bytes", v.len())))
    }
}
