use crate::auth::CdnAuthToken;
use crate::cdn::error::CdnResult;
use crate::cdn::types::ChunkRequest;
use crate::depot::AppInfo;
use async_trait::async_trait;
use bytes::Bytes;

/// Issues short-lived CDN authorization tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self, app_id: u32) -> CdnResult<CdnAuthToken>;
}

/// Content endpoints of the CDN
#[async_trait]
pub trait CdnClient: Send + Sync {
    /// Catalog entry for an app: its depots and current manifest ids
    async fn app_info(&self, token: &CdnAuthToken, app_id: u32) -> CdnResult<AppInfo>;

    /// Raw manifest document for one depot revision
    async fn fetch_manifest(
        &self,
        token: &CdnAuthToken,
        depot_id: u32,
        manifest_id: u64,
    ) -> CdnResult<Bytes>;

    /// Compressed bytes of one chunk
    async fn fetch_chunk(&self, token: &CdnAuthToken, request: &ChunkRequest) -> CdnResult<Bytes>;
}
