//! The "scan" stage: fetch the lead's homepage and work out who they are.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;
use crate::provisioning::RemoteError;
use crate::provisioning::validate::{is_valid_hostname, slug_from_domain};
use crate::retry::{RetryFailure, RetryPolicy, with_retry};

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex should compile"));

static OG_SITE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]+property=["']og:site_name["'][^>]+content=["']([^"']+)["']"#)
        .expect("og:site_name regex should compile")
});

/// What the scanner learned about a lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub url: String,
    pub display_name: String,
    /// Slug usable as a subdomain label.
    pub domain_candidate: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot scan {0}: not a valid hostname")]
    InvalidDomain(String),

    #[error("scanning {url} failed: {source}")]
    Remote {
        url: String,
        #[source]
        source: RemoteError,
    },

    #[error("scanning {url} still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::InvalidDomain(_) => ErrorKind::Validation,
            ScanError::Remote { source, .. } if source.is_transient() => ErrorKind::Transient,
            ScanError::Remote { .. } => ErrorKind::Permanent,
            ScanError::RetriesExhausted { .. } => ErrorKind::MaxRetriesExceeded,
        }
    }
}

#[async_trait]
pub trait TargetScanner: Send + Sync {
    async fn scan(&self, domain: &str) -> Result<ScanReport, ScanError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bodies beyond this size are cut; the rest is never read.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_body_bytes() -> usize {
    512 * 1024
}

fn default_scheme() -> String {
    "https".into()
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            scheme: default_scheme(),
        }
    }
}

pub struct HttpScanner {
    client: Client,
    settings: ScanSettings,
    retry: RetryPolicy,
}

impl HttpScanner {
    pub fn new(settings: ScanSettings, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("demoforge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            settings,
            retry,
        })
    }

    /// GET `url`, reading at most `max_body_bytes` of the body.
    async fn fetch(&self, url: &str) -> Result<String, RemoteError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), String::new(), None));
        }
        let limit = self.settings.max_body_bytes;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = limit - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!(url, limit, "body cut at size limit");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(decode_body(body))
    }
}

/// Lossy UTF-8, dropping a character split by the size limit.
fn decode_body(mut bytes: Vec<u8>) -> String {
    if let Err(e) = std::str::from_utf8(&bytes)
        && e.error_len().is_none()
    {
        bytes.truncate(e.valid_up_to());
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[async_trait]
impl TargetScanner for HttpScanner {
    async fn scan(&self, domain: &str) -> Result<ScanReport, ScanError> {
        if !is_valid_hostname(domain) {
            return Err(ScanError::InvalidDomain(domain.to_string()));
        }
        let url = format!("{}://{domain}/", self.settings.scheme);
        let html = with_retry(&self.retry, "scan.fetch", || self.fetch(&url))
            .await
            .map_err(|failure| match failure {
                RetryFailure::Permanent(source) => ScanError::Remote {
                    url: url.clone(),
                    source,
                },
                RetryFailure::Exhausted { attempts, last } => ScanError::RetriesExhausted {
                    url: url.clone(),
                    attempts,
                    source: last,
                },
            })?;
        debug!(domain, bytes = html.len(), "homepage fetched");
        Ok(report_from_html(domain, url, html))
    }
}

/// Build a report from a fetched page. The display name prefers
/// `og:site_name`, then the `<title>` up to its first separator, then the
/// domain itself.
pub fn report_from_html(domain: &str, url: String, html: String) -> ScanReport {
    let domain_candidate = slug_from_domain(domain).unwrap_or_else(|| "site".to_string());
    let display_name = display_name(&html).unwrap_or_else(|| name_from_slug(&domain_candidate));
    ScanReport {
        url,
        display_name,
        domain_candidate,
        html,
    }
}

fn display_name(html: &str) -> Option<String> {
    if let Some(caps) = OG_SITE_NAME.captures(html) {
        let name = clean_text(&caps[1]);
        if !name.is_empty() {
            return Some(name);
        }
    }
    let title = clean_text(&TITLE.captures(html)?[1]);
    let head = [" | ", " - ", " – ", " — ", " :: "]
        .iter()
        .filter_map(|sep| title.split_once(sep).map(|(head, _)| head))
        .min_by_key(|head| head.len())
        .unwrap_or(title.as_str())
        .trim()
        .to_string();
    if head.is_empty() { None } else { Some(head) }
}

fn clean_text(raw: &str) -> String {
    let decoded = raw
        .replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn name_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
