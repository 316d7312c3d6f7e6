use crate::config::serde_millis;
use crate::depot::FileChunk;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Token-exchange endpoint (must be set before use)
    pub auth_url: String,

    #[serde(with = "serde_millis")]
    pub request_timeout: Duration,

    #[serde(with = "serde_millis")]
    pub connect_timeout: Duration,

    pub user_agent: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("depot-installer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Token-exchange response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub expires_at: i64,
    pub cdn_base_url: String,
}

/// Location of one chunk on the CDN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub depot_id: u32,
    pub content_hash: [u8; 20],
    pub compressed_size: u32,
}

impl ChunkRequest {
    pub fn for_chunk(depot_id: u32, chunk: &FileChunk) -> Self {
        Self {
            depot_id,
            content_hash: chunk.content_hash,
            compressed_size: chunk.compressed_size,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }

    /// HTTP `Range` header value covering the compressed payload
    pub fn range_header(&self) -> Option<String> {
        if self.compressed_size == 0 {
            return None;
        }
        Some(format!("bytes=0-{}", self.compressed_size - 1))
    }
}
