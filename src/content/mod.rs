//! AI content generation for the demo site.

mod anthropic;

pub use anthropic::{AnthropicContentService, ContentSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::error::ErrorKind;

/// Copy for one demo site, produced from the lead's scanned page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentPackage {
    pub site_title: String,
    pub tagline: String,
    pub about: String,
    pub services: Vec<String>,
    pub call_to_action: String,
    /// Pre-rendered markup injected verbatim into the page body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
}

impl ContentPackage {
    /// A package carrying caller-supplied markup instead of generated copy.
    pub fn from_html(site_title: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            site_title: site_title.into(),
            body_html: Some(html.into()),
            ..Self::default()
        }
    }

    pub(crate) fn check(&self) -> Result<(), ContentError> {
        if self.site_title.trim().is_empty() {
            return Err(ContentError::Malformed("siteTitle is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content API call failed: {0}")]
    Api(#[from] AnthropicError),

    #[error("model returned unusable content: {0}")]
    Malformed(String),
}

impl ContentError {
    /// Content failures are never retried: a job that cannot get copy fails.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContentError::Api(_) | ContentError::Malformed(_) => ErrorKind::Permanent,
        }
    }
}

/// Turns a scanned page into a [`ContentPackage`].
#[async_trait]
pub trait ContentService: Send + Sync {
    async fn generate(&self, html: &str, url: &str) -> Result<ContentPackage, ContentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_parses_with_missing_fields() {
        let pkg: ContentPackage =
            serde_json::from_str(r#"{"siteTitle":"Acme","services":["Repairs"]}"#).unwrap();
        assert_eq!(pkg.site_title, "Acme");
        assert_eq!(pkg.services, vec!["Repairs".to_string()]);
        assert!(pkg.tagline.is_empty());
        assert!(pkg.body_html.is_none());
    }

    #[test]
    fn empty_title_is_malformed() {
        let err = ContentPackage::default().check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn api_errors_are_permanent() {
        let overloaded = ContentError::Api(AnthropicError::ApiError {
            status: 503,
            message: "down".into(),
        });
        assert_eq!(overloaded.kind(), ErrorKind::Permanent);
        let rate = ContentError::Api(AnthropicError::RateLimited { retry_after_ms: 10 });
        assert_eq!(rate.kind(), ErrorKind::Permanent);
    }
}
