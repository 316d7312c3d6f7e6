use crate::auth::CdnAuthToken;
use crate::cdn::error::{CdnError, CdnResult};
use crate::cdn::traits::{CdnClient, TokenSource};
use crate::cdn::types::{CdnConfig, ChunkRequest, TokenGrant};
use crate::depot::AppInfo;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

/// reqwest-backed CDN client.
///
/// Exchanges the login access token it is handed for CDN tokens and serves
/// app info, manifests and chunks from the token's CDN host.
#[derive(Clone)]
pub struct HttpCdnClient {
    client: reqwest::Client,
    auth_url: Url,
    access_token: String,
}

impl HttpCdnClient {
    pub fn new(config: &CdnConfig, access_token: impl Into<String>) -> CdnResult<Self> {
        if config.auth_url.is_empty() {
            return Err(CdnError::InvalidUrl("auth_url is not configured".into()));
        }
        let auth_url = Url::parse(&config.auth_url)?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CdnError::Network(e.to_string()))?;

        Ok(Self {
            client,
            auth_url,
            access_token: access_token.into(),
        })
    }

    fn check_status(response: reqwest::Response) -> CdnResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CdnError::Unauthorized(url),
            StatusCode::NOT_FOUND => CdnError::NotFound(url),
            _ => CdnError::Http {
                status: status.as_u16(),
                url,
            },
        })
    }

    async fn get_bytes(
        &self,
        url: Url,
        token: &CdnAuthToken,
        range: Option<String>,
    ) -> CdnResult<Bytes> {
        let mut request = self.client.get(url).bearer_auth(&token.token);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }

        let response = Self::check_status(request.send().await?)?;
        Ok(response.bytes().await?)
    }
}

pub(crate) fn app_info_url(base: &Url, app_id: u32) -> CdnResult<Url> {
    Ok(base.join(&format!("app/{app_id}/info"))?)
}

pub(crate) fn manifest_url(base: &Url, depot_id: u32, manifest_id: u64) -> CdnResult<Url> {
    Ok(base.join(&format!("depot/{depot_id}/manifest/{manifest_id}"))?)
}

pub(crate) fn chunk_url(base: &Url, request: &ChunkRequest) -> CdnResult<Url> {
    Ok(base.join(&format!(
        "depot/{}/chunk/{}",
        request.depot_id,
        request.hash_hex()
    ))?)
}

#[async_trait]
impl TokenSource for HttpCdnClient {
    async fn acquire(&self, app_id: u32) -> CdnResult<CdnAuthToken> {
        let response = self
            .client
            .post(self.auth_url.clone())
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "app_id": app_id }))
            .send()
            .await?;

        let grant: TokenGrant = Self::check_status(response)?.json().await?;
        tracing::debug!(app_id, expires_at = grant.expires_at, "CDN token issued");

        Ok(CdnAuthToken::new(
            grant.token,
            grant.expires_at,
            grant.cdn_base_url,
        ))
    }
}

#[async_trait]
impl CdnClient for HttpCdnClient {
    async fn app_info(&self, token: &CdnAuthToken, app_id: u32) -> CdnResult<AppInfo> {
        let url = app_info_url(&token.base_url()?, app_id)?;
        let body = self.get_bytes(url, token, None).await?;
        serde_json::from_slice(&body).map_err(|e| CdnError::InvalidResponse(e.to_string()))
    }

    async fn fetch_manifest(
        &self,
        token: &CdnAuthToken,
        depot_id: u32,
        manifest_id: u64,
    ) -> CdnResult<Bytes> {
        let url = manifest_url(&token.base_url()?, depot_id, manifest_id)?;
        self.get_bytes(url, token, None).await
    }

    async fn fetch_chunk(&self, token: &CdnAuthToken, request: &ChunkRequest) -> CdnResult<Bytes> {
        let url = chunk_url(&token.base_url()?, request)?;
        let body = self.get_bytes(url, token, request.range_header()).await?;

        if body.len() != request.compressed_size as usize {
            return Err(CdnError::InvalidResponse(format!(
                "chunk {} returned {} bytes, expected {}",
                request.hash_hex(),
                body.len(),
                request.compressed_size
            )));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cache1.example.net/").unwrap()
    }

    #[test]
    fn test_chunk_url() {
        let request = ChunkRequest {
            depot_id: 229,
            content_hash: [0xab; 20],
            compressed_size: 100,
        };
        let url = chunk_url(&base(), &request).unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://cache1.example.net/depot/229/chunk/{}", "ab".repeat(20))
        );
        assert_eq!(request.range_header().as_deref(), Some("bytes=0-99"));
    }

    #[test]
    fn test_manifest_and_info_urls() {
        assert_eq!(
            manifest_url(&base(), 7, 42).unwrap().as_str(),
            "https://cache1.example.net/depot/7/manifest/42"
        );
        assert_eq!(
            app_info_url(&base(), 7).unwrap().as_str(),
            "https://cache1.example.net/app/7/info"
        );
    }

    #[test]
    fn test_missing_auth_url() {
        let result = HttpCdnClient::new(&CdnConfig::default(), "access");
        assert!(matches!(result, Err(CdnError::InvalidUrl(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CdnError::Timeout.is_transient());
        assert!(CdnError::Http {
            status: 503,
            url: String::new()
        }
        .is_transient());
        assert!(!CdnError::Unauthorized("x".into()).is_transient());
        assert!(!CdnError::NotFound("x".into()).is_transient());
    }
}
