use thiserror::Error;

/// Errors talking to the Anthropic Messages API.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` comes from the `retry-after` header.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success status.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("failed to parse API response: {0}")]
    ParseError(String),

    /// DNS, connection refused, timeout.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
