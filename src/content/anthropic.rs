use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ContentError, ContentPackage, ContentService};
use crate::anthropic::{Message, MessageSender, MessagesRequest};

const SYSTEM_PROMPT: &str = "You write website copy for small businesses. \
Respond with ONLY valid JSON, no other text.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Scanned HTML beyond this many bytes is cut before prompting.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_input_bytes() -> usize {
    24 * 1024
}

fn default_timeout_secs() -> u64 {
    90
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_input_bytes: default_max_input_bytes(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// [`ContentService`] backed by the Anthropic Messages API.
pub struct AnthropicContentService<S> {
    sender: S,
    settings: ContentSettings,
}

impl<S: MessageSender> AnthropicContentService<S> {
    pub fn new(sender: S, settings: ContentSettings) -> Self {
        Self { sender, settings }
    }

    fn request(&self, html: &str, url: &str) -> MessagesRequest {
        let page = truncate_on_char_boundary(html, self.settings.max_input_bytes);
        MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            system: Some(SYSTEM_PROMPT.into()),
            messages: vec![Message::user(format!(
                "Write the copy for a one-page demo website for the business at {url}.\n\
                 Format: {{\"siteTitle\": \"...\", \"tagline\": \"...\", \"about\": \"...\", \
                 \"services\": [\"...\"], \"callToAction\": \"...\"}}\n\
                 \n\
                 Their current homepage:\n{page}"
            ))],
        }
    }
}

#[async_trait]
impl<S: MessageSender + 'static> ContentService for AnthropicContentService<S> {
    async fn generate(&self, html: &str, url: &str) -> Result<ContentPackage, ContentError> {
        let req = self.request(html, url);
        let response = self.sender.send_message(&req).await.map_err(|e| {
            warn!(url, error = %e, "content API call failed");
            ContentError::Api(e)
        })?;

        debug!(
            url,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "content generated"
        );
        parse_package(&response.text())
    }
}

/// Models sometimes wrap JSON in a markdown fence despite being told not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_package(text: &str) -> Result<ContentPackage, ContentError> {
    let package: ContentPackage = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ContentError::Malformed(e.to_string()))?;
    package.check()?;
    Ok(package)
}

fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::anthropic::types::{ContentBlock, Usage};
    use crate::anthropic::{AnthropicError, MessagesResponse};
    use crate::error::ErrorKind;

    struct MockClient {
        replies: Mutex<VecDeque<Result<String, AnthropicError>>>,
        calls: AtomicUsize,
    }

    impl MockClient {
        fn new(replies: Vec<Result<String, AnthropicError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MessageSender for MockClient {
        async fn send_message(
            &self,
            _req: &MessagesRequest,
        ) -> Result<MessagesResponse, AnthropicError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => Ok(MessagesResponse {
                    id: "mock".into(),
                    content: vec![ContentBlock {
                        content_type: "text".into(),
                        text,
                    }],
                    model: "mock".into(),
                    stop_reason: Some("end_turn".into()),
                    usage: Usage {
                        input_tokens: 0,
                        output_tokens: 0,
                    },
                }),
                Some(Err(e)) => Err(e),
                None => Err(AnthropicError::ParseError("no reply scripted".into())),
            }
        }
    }

    fn service(replies: Vec<Result<String, AnthropicError>>) -> AnthropicContentService<MockClient> {
        AnthropicContentService::new(MockClient::new(replies), ContentSettings::default())
    }

    const GOOD: &str = r#"{"siteTitle":"Acme Plumbing","tagline":"Fast fixes","about":"Family run.","services":["Leaks","Drains"],"callToAction":"Call now"}"#;

    #[tokio::test]
    async fn parses_generated_package() {
        let pkg = service(vec![Ok(GOOD.into())])
            .generate("<html></html>", "https://acme.biz/")
            .await
            .unwrap();
        assert_eq!(pkg.site_title, "Acme Plumbing");
        assert_eq!(pkg.services.len(), 2);
        assert!(pkg.body_html.is_none());
    }

    #[tokio::test]
    async fn accepts_fenced_json() {
        let fenced = format!("```json\n{GOOD}\n```");
        let pkg = service(vec![Ok(fenced)])
            .generate("", "https://acme.biz/")
            .await
            .unwrap();
        assert_eq!(pkg.call_to_action, "Call now");
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let service = service(vec![
            Err(AnthropicError::RateLimited { retry_after_ms: 0 }),
            Ok(GOOD.into()),
        ]);
        let err = service.generate("", "https://acme.biz/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(service.sender.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_output_is_permanent() {
        let err = service(vec![Ok("Sure! Here is your copy.".into())])
            .generate("", "https://acme.biz/")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let err = service(vec![
            Err(AnthropicError::ApiError {
                status: 400,
                message: "bad".into(),
            }),
            Ok(GOOD.into()),
        ])
        .generate("", "https://acme.biz/")
        .await
        .unwrap_err();
        assert!(matches!(err, ContentError::Api(AnthropicError::ApiError { status: 400, .. })));
    }

    #[tokio::test]
    async fn server_error_fails_after_one_call() {
        let overloaded = || {
            Err(AnthropicError::ApiError {
                status: 503,
                message: "down".into(),
            })
        };
        let service = service(vec![overloaded(), overloaded(), Ok(GOOD.into())]);
        let err = service.generate("", "https://acme.biz/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(matches!(err, ContentError::Api(AnthropicError::ApiError { status: 503, .. })));
        assert_eq!(service.sender.calls(), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_on_char_boundary("héllo", 2), "h");
        assert_eq!(truncate_on_char_boundary("abc", 10), "abc");
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }
}
