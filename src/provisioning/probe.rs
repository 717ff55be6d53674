use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::error::RemoteError;

/// Fetches a deployed page to confirm it is live.
#[async_trait]
pub trait SiteProbe: Send + Sync {
    /// `Ok(true)` when `url` answers 2xx and, if given, the body contains
    /// `marker`. `Ok(false)` when the page is reachable but not ours yet.
    async fn probe(&self, url: &str, marker: Option<&str>) -> Result<bool, RemoteError>;
}

pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SiteProbe for HttpProbe {
    async fn probe(&self, url: &str, marker: Option<&str>) -> Result<bool, RemoteError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), String::new(), None));
        }
        match marker {
            None => Ok(true),
            Some(marker) => {
                let body = response.text().await?;
                Ok(body.contains(marker))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn probe() -> HttpProbe {
        HttpProbe::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn marker_present() {
        let server = serve(200, "<html><!-- demoforge-j1 --></html>").await;
        assert!(probe().probe(&server.uri(), Some("demoforge-j1")).await.unwrap());
    }

    #[tokio::test]
    async fn marker_missing() {
        let server = serve(200, "<html>default host page</html>").await;
        assert!(!probe().probe(&server.uri(), Some("demoforge-j1")).await.unwrap());
    }

    #[tokio::test]
    async fn not_found_is_not_yet_live() {
        let server = serve(404, "").await;
        assert!(!probe().probe(&server.uri(), None).await.unwrap());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = serve(502, "").await;
        let err = probe().probe(&server.uri(), None).await.unwrap_err();
        assert!(err.is_transient());
    }
}
