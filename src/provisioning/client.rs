use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::error::{ProvisioningError, RemoteError};
use super::hosting::HostingControlPlane;
use super::probe::SiteProbe;
use super::transfer::FileTransfer;
use super::types::{ProvisioningRequest, ProvisioningResult, SiteSpec, TransferCredentials};
use super::validate;
use crate::retry::{RetryPolicy, with_retry};

/// Knobs for [`ProvisioningClient`].
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub retry: RetryPolicy,
    pub max_html_bytes: usize,
    /// Upper bound for one upload session (open, write all, post-install).
    pub transfer_timeout: Duration,
    /// `https` in production; `http` for local stacks.
    pub url_scheme: String,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_html_bytes: 2 * 1024 * 1024,
            transfer_timeout: Duration::from_secs(120),
            url_scheme: "https".to_string(),
        }
    }
}

/// Issues remote operations against the hosting platform.
///
/// Every remote step is retried on transient failures with bounded
/// exponential backoff. Writes overwrite, so re-running a request after a
/// partial failure converges on the same file state.
pub struct ProvisioningClient {
    hosting: Arc<dyn HostingControlPlane>,
    transfer: Arc<dyn FileTransfer>,
    probe: Arc<dyn SiteProbe>,
    settings: ProvisioningSettings,
}

impl ProvisioningClient {
    pub fn new(
        hosting: Arc<dyn HostingControlPlane>,
        transfer: Arc<dyn FileTransfer>,
        probe: Arc<dyn SiteProbe>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            hosting,
            transfer,
            probe,
            settings,
        }
    }

    pub fn site_url(&self, domain: &str) -> String {
        format!("{}://{domain}", self.settings.url_scheme)
    }

    pub async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        self.validate(request)?;
        let retry = &self.settings.retry;

        let spec = SiteSpec {
            domain: request.domain.clone(),
            client_id: request.client_id.clone(),
            client_slug: request.client_slug.clone(),
            blueprint_id: request.blueprint_id.clone(),
        };
        let site = with_retry(retry, "ensure site", || self.hosting.ensure_site(&spec))
            .await
            .map_err(|f| ProvisioningError::from_retry("ensure site", f))?;
        info!(domain = %request.domain, site_id = %site.id, created = site.created, "hosting package ready");

        let credentials = with_retry(retry, "fetch credentials", || {
            self.hosting.credentials(&site)
        })
        .await
        .map_err(|f| ProvisioningError::from_retry("fetch credentials", f))?;

        with_retry(retry, "upload files", || self.upload(&credentials, request))
            .await
            .map_err(|f| ProvisioningError::from_retry("upload files", f))?;
        info!(
            domain = %request.domain,
            files = request.files.len(),
            "site files written"
        );

        Ok(ProvisioningResult {
            success: true,
            url: self.site_url(&request.domain),
            credentials: Some(credentials),
            error: None,
        })
    }

    /// Poll `url` until it serves `marker`. Transient errors and "not ours
    /// yet" answers are retried under the same policy. `Ok(false)` means the
    /// site answered but never served the marker; if the last attempt still
    /// failed transiently the result is [`ProvisioningError::RetriesExhausted`].
    pub async fn verify_reachable(
        &self,
        url: &str,
        marker: Option<&str>,
    ) -> Result<bool, ProvisioningError> {
        let retry = &self.settings.retry;
        let max = retry.max_attempts.max(1);
        let mut last_transient = None;
        for attempt in 1..=max {
            match self.probe.probe(url, marker).await {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    debug!(url, attempt, "site not serving the deploy marker yet");
                    last_transient = None;
                }
                Err(e) if e.is_transient() => {
                    warn!(url, attempt, error = %e, "verification check failed");
                    last_transient = Some(e);
                }
                Err(source) => {
                    return Err(ProvisioningError::Permanent {
                        step: "verify site",
                        source,
                    });
                }
            }
            if attempt < max {
                sleep(Duration::from_millis(retry.delay_for_attempt(attempt))).await;
            }
        }
        match last_transient {
            Some(source) => Err(ProvisioningError::RetriesExhausted {
                step: "verify site",
                attempts: max,
                source,
            }),
            None => Ok(false),
        }
    }

    fn validate(&self, request: &ProvisioningRequest) -> Result<(), ProvisioningError> {
        if !validate::is_valid_hostname(&request.domain) {
            return Err(ProvisioningError::Validation(format!(
                "`{}` is not a valid hostname",
                request.domain
            )));
        }
        if !validate::is_valid_slug(&request.client_slug) {
            return Err(ProvisioningError::Validation(format!(
                "`{}` is not a valid client slug",
                request.client_slug
            )));
        }
        if request.client_id.trim().is_empty() {
            return Err(ProvisioningError::Validation("client id is required".into()));
        }
        let size = request.html_content.len();
        if size > self.settings.max_html_bytes {
            return Err(ProvisioningError::PayloadTooLarge {
                size,
                limit: self.settings.max_html_bytes,
            });
        }
        Ok(())
    }

    async fn upload(
        &self,
        credentials: &TransferCredentials,
        request: &ProvisioningRequest,
    ) -> Result<(), RemoteError> {
        let work = async {
            let mut session = self.transfer.open(credentials).await?;
            for file in &request.files {
                session.write_file(&file.path, file.contents.as_bytes()).await?;
            }
            if let Some(command) = &request.post_install {
                let output = session.exec(command).await?;
                debug!(code = output.code, "post-install finished");
            }
            session.close().await
        };
        match timeout(self.settings.transfer_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }
}
