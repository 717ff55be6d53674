//! Failure classification for hosting and file-transfer calls.

use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::retry::{RetryFailure, RetryHint, Retryable};

/// A failed call against the control plane, the transfer session or the
/// deployed site.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("credentials rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("domain {domain} belongs to another client")]
    DomainConflict { domain: String },

    #[error("hosting quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("refusing to write outside the site root: {0}")]
    InvalidPath(String),

    #[error("remote command exited with {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },
}

impl RemoteError {
    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, message: String, retry_after_ms: Option<u64>) -> Self {
        match status {
            429 => RemoteError::RateLimited {
                retry_after_ms: retry_after_ms.unwrap_or(1000),
            },
            401 | 403 => RemoteError::Unauthorized { status },
            402 => RemoteError::QuotaExceeded(message),
            408 => RemoteError::Timeout,
            500..=599 => RemoteError::Unavailable { status },
            _ => RemoteError::Rejected { status, message },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Timeout
                | RemoteError::Connect(_)
                | RemoteError::Unavailable { .. }
                | RemoteError::RateLimited { .. }
                | RemoteError::Transfer(_)
        )
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() || err.is_request() {
            RemoteError::Connect(err.to_string())
        } else if err.is_decode() {
            RemoteError::Malformed(err.to_string())
        } else {
            RemoteError::Connect(err.to_string())
        }
    }
}

impl Retryable for RemoteError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            RemoteError::RateLimited { retry_after_ms } => RetryHint::Transient {
                after: Some(Duration::from_millis(*retry_after_ms)),
            },
            e if e.is_transient() => RetryHint::Transient { after: None },
            _ => RetryHint::Permanent,
        }
    }
}

/// Error returned by [`ProvisioningClient`](super::ProvisioningClient).
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("invalid provisioning request: {0}")]
    Validation(String),

    #[error("html payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{step} failed permanently: {source}")]
    Permanent {
        step: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("{step} still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        step: &'static str,
        attempts: u32,
        #[source]
        source: RemoteError,
    },
}

impl ProvisioningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisioningError::Validation(_) => ErrorKind::Validation,
            ProvisioningError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ProvisioningError::Permanent { .. } => ErrorKind::Permanent,
            ProvisioningError::RetriesExhausted { .. } => ErrorKind::MaxRetriesExceeded,
        }
    }

    pub(crate) fn from_retry(step: &'static str, failure: RetryFailure<RemoteError>) -> Self {
        match failure {
            RetryFailure::Permanent(source) => ProvisioningError::Permanent { step, source },
            RetryFailure::Exhausted { attempts, last } => ProvisioningError::RetriesExhausted {
                step,
                attempts,
                source: last,
            },
        }
    }
}
