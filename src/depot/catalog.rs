use crate::auth::CdnAuthToken;
use crate::cdn::CdnClient;
use crate::depot::error::{DepotError, DepotResult};
use crate::depot::types::{AppInfo, DepotManifest, ManifestInfo};
use dashmap::DashMap;
use std::sync::Arc;

pub const DEFAULT_BRANCH: &str = "public";

/// Maps apps and depots to their current manifests.
///
/// App entries are cached after the first lookup; `forget` drops an entry so
/// the next lookup sees a newly published manifest.
pub struct DepotCatalog {
    cdn: Arc<dyn CdnClient>,
    apps: DashMap<u32, AppInfo>,
}

impl DepotCatalog {
    pub fn new(cdn: Arc<dyn CdnClient>) -> Self {
        Self {
            cdn,
            apps: DashMap::new(),
        }
    }

    pub async fn app_info(&self, token: &CdnAuthToken, app_id: u32) -> DepotResult<AppInfo> {
        if let Some(info) = self.apps.get(&app_id) {
            return Ok(info.value().clone());
        }

        let info = match self.cdn.app_info(token, app_id).await {
            Ok(info) => info,
            Err(crate::cdn::CdnError::NotFound(_)) => return Err(DepotError::AppNotFound(app_id)),
            Err(e) => return Err(e.into()),
        };
        if info.app_id != app_id {
            return Err(DepotError::ManifestMismatch(format!(
                "requested app {} but catalog returned {}",
                app_id, info.app_id
            )));
        }

        tracing::debug!(app_id, depots = info.depots.len(), "Cached app info");
        self.apps.insert(app_id, info.clone());
        Ok(info)
    }

    /// Seed the cache with a known catalog entry
    pub fn register(&self, info: AppInfo) {
        self.apps.insert(info.app_id, info);
    }

    pub fn forget(&self, app_id: u32) {
        self.apps.remove(&app_id);
    }

    /// Current manifest of `depot_id` on `branch`
    pub async fn current_manifest(
        &self,
        token: &CdnAuthToken,
        app_id: u32,
        depot_id: u32,
        branch: &str,
    ) -> DepotResult<ManifestInfo> {
        let info = self.app_info(token, app_id).await?;
        info.depot(depot_id)
            .and_then(|depot| depot.manifests.get(branch))
            .cloned()
            .ok_or_else(|| DepotError::DepotNotFound {
                app_id,
                depot_id,
                branch: branch.to_string(),
            })
    }

    /// Resolve, download and validate the current manifest of a depot
    pub async fn fetch_manifest(
        &self,
        token: &CdnAuthToken,
        app_id: u32,
        depot_id: u32,
        branch: &str,
    ) -> DepotResult<DepotManifest> {
        let info = self.current_manifest(token, app_id, depot_id, branch).await?;
        let raw = self
            .cdn
            .fetch_manifest(token, depot_id, info.manifest_id)
            .await?;
        let manifest = DepotManifest::from_json(&raw)?;

        if manifest.depot_id != depot_id {
            return Err(DepotError::ManifestMismatch(format!(
                "manifest belongs to depot {} not {}",
                manifest.depot_id, depot_id
            )));
        }
        if manifest.manifest_id != info.manifest_id {
            return Err(DepotError::ManifestMismatch(format!(
                "expected manifest {} got {}",
                info.manifest_id, manifest.manifest_id
            )));
        }
        if manifest.total_size != info.size {
            return Err(DepotError::ManifestMismatch(format!(
                "catalog lists {} bytes, manifest describes {}",
                info.size, manifest.total_size
            )));
        }

        tracing::info!(
            app_id,
            depot_id,
            manifest_id = manifest.manifest_id,
            files = manifest.files.len(),
            total_size = manifest.total_size,
            "Fetched depot manifest"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCdn;

    fn token() -> CdnAuthToken {
        CdnAuthToken::new("t", chrono::Utc::now().timestamp() + 3600, "https://cdn.test/")
    }

    #[tokio::test]
    async fn test_fetch_current_manifest() {
        let cdn = Arc::new(MemoryCdn::new());
        let manifest = cdn.publish_manifest(7, 70, 9001, &[("a.bin", vec![1u8; 300])]);
        let catalog = DepotCatalog::new(cdn.clone());

        let fetched = catalog
            .fetch_manifest(&token(), 7, 70, DEFAULT_BRANCH)
            .await
            .unwrap();
        assert_eq!(fetched, manifest);
    }

    #[tokio::test]
    async fn test_app_info_is_cached() {
        let cdn = Arc::new(MemoryCdn::new());
        cdn.publish_manifest(7, 70, 1, &[("a.bin", vec![1u8; 10])]);
        let catalog = DepotCatalog::new(cdn.clone());

        catalog.app_info(&token(), 7).await.unwrap();
        catalog.app_info(&token(), 7).await.unwrap();
        assert_eq!(cdn.app_info_requests(), 1);

        catalog.forget(7);
        catalog.app_info(&token(), 7).await.unwrap();
        assert_eq!(cdn.app_info_requests(), 2);
    }

    #[tokio::test]
    async fn test_unknown_app_and_depot() {
        let cdn = Arc::new(MemoryCdn::new());
        cdn.publish_manifest(7, 70, 1, &[("a.bin", vec![1u8; 10])]);
        let catalog = DepotCatalog::new(cdn);

        let missing_app = catalog.app_info(&token(), 8).await;
        assert!(matches!(missing_app, Err(DepotError::AppNotFound(8))));

        let missing_depot = catalog.current_manifest(&token(), 7, 71, DEFAULT_BRANCH).await;
        assert!(matches!(missing_depot, Err(DepotError::DepotNotFound { depot_id: 71, .. })));

        let missing_branch = catalog.current_manifest(&token(), 7, 70, "beta").await;
        assert!(matches!(missing_branch, Err(DepotError::DepotNotFound { .. })));
    }

    #[tokio::test]
    async fn test_catalog_size_mismatch_rejected() {
        let cdn = Arc::new(MemoryCdn::new());
        let manifest = cdn.publish_manifest(7, 70, 1, &[("a.bin", vec![1u8; 10])]);
        let catalog = DepotCatalog::new(cdn);

        let mut info = catalog.app_info(&token(), 7).await.unwrap();
        info.depots[0]
            .manifests
            .get_mut(DEFAULT_BRANCH)
            .unwrap()
            .size = manifest.total_size + 1;
        catalog.register(info);

        let result = catalog.fetch_manifest(&token(), 7, 70, DEFAULT_BRANCH).await;
        assert!(matches!(result, Err(DepotError::ManifestMismatch(_))));
    }
}
