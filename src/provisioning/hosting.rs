use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use super::error::RemoteError;
use super::types::{HostedSite, SiteSpec, TransferCredentials};

/// The hosting provider's control API.
#[async_trait]
pub trait HostingControlPlane: Send + Sync {
    /// Create the hosting package for `spec.domain`, or return the existing
    /// one when it already belongs to `spec.client_slug`.
    async fn ensure_site(&self, spec: &SiteSpec) -> Result<HostedSite, RemoteError>;

    /// File-transfer credentials for a package.
    async fn credentials(&self, site: &HostedSite) -> Result<TransferCredentials, RemoteError>;
}

/// JSON-over-HTTP control plane client.
///
/// `POST {base}/sites` creates or returns a package (`201` created, `200`
/// existing, `409` owned by someone else). `GET {base}/sites/{id}/credentials`
/// returns [`TransferCredentials`].
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl HostingControlPlane for HttpControlPlane {
    async fn ensure_site(&self, spec: &SiteSpec) -> Result<HostedSite, RemoteError> {
        let response = self
            .client
            .post(format!("{}/sites", self.base_url))
            .bearer_auth(&self.token)
            .json(spec)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(RemoteError::DomainConflict {
                domain: spec.domain.clone(),
            });
        }
        let created = response.status() == StatusCode::CREATED;
        let mut site: HostedSite = parse(response).await?;
        site.created = created;

        if site.client_slug != spec.client_slug {
            return Err(RemoteError::DomainConflict {
                domain: spec.domain.clone(),
            });
        }
        debug!(site_id = %site.id, domain = %site.domain, created, "hosting package ready");
        Ok(site)
    }

    async fn credentials(&self, site: &HostedSite) -> Result<TransferCredentials, RemoteError> {
        let response = self
            .client
            .get(format!("{}/sites/{}/credentials", self.base_url, site.id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        parse(response).await
    }
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(RemoteError::from_status(status.as_u16(), message, retry_after));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec() -> SiteSpec {
        SiteSpec {
            domain: "acme.demo.localtest.me".into(),
            client_id: "c-1".into(),
            client_slug: "acme".into(),
            blueprint_id: "wp-starter".into(),
        }
    }

    fn plane(server: &MockServer) -> HttpControlPlane {
        HttpControlPlane::new(server.uri(), "tok", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn creates_site_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sites"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "pkg-1",
                "domain": "acme.demo.localtest.me",
                "clientSlug": "acme"
            })))
            .mount(&server)
            .await;

        let site = plane(&server).ensure_site(&spec()).await.unwrap();
        assert_eq!(site.id, "pkg-1");
        assert!(site.created);
    }

    #[tokio::test]
    async fn existing_site_of_same_client_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pkg-1",
                "domain": "acme.demo.localtest.me",
                "clientSlug": "acme"
            })))
            .mount(&server)
            .await;

        let site = plane(&server).ensure_site(&spec()).await.unwrap();
        assert!(!site.created);
    }

    #[tokio::test]
    async fn conflict_is_domain_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sites"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let err = plane(&server).ensure_site(&spec()).await.unwrap_err();
        assert!(matches!(err, RemoteError::DomainConflict { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sites/pkg-1/credentials"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let site = HostedSite {
            id: "pkg-1".into(),
            domain: "acme.demo.localtest.me".into(),
            client_slug: "acme".into(),
            created: false,
        };
        let err = plane(&server).credentials(&site).await.unwrap_err();
        match err {
            RemoteError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 3000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sites"))
            .respond_with(ResponseTemplate::new(201).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = plane(&server).ensure_site(&spec()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }
}
