use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::state_machine::StateError;
use crate::store::StoreError;

/// Coarse classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Bad input shape, rejected before any remote call.
    Validation,
    /// A validation failure for oversized HTML.
    PayloadTooLarge,
    /// Retryable remote failure.
    Transient,
    /// Non-retryable remote failure: auth, quota, conflict.
    Permanent,
    /// State machine misuse.
    InvalidTransition,
    NotFound,
    /// Lost too many conditional-write races, or a duplicate record.
    Conflict,
    /// Stage deadline exceeded.
    Timeout,
    MaxRetriesExceeded,
    /// Local persistence failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Startup failures: the config file could not be read or parsed.
#[derive(Debug, Error)]
pub enum DemoforgeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::DuplicateJob(_) | StoreError::DuplicateEmail(_) => ErrorKind::Conflict,
            StoreError::Io(_) | StoreError::Corrupt(_) => ErrorKind::Internal,
        }
    }
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::NotFound(_) => ErrorKind::NotFound,
            StateError::InvalidTransition(_) | StateError::StaleStage { .. } => {
                ErrorKind::InvalidTransition
            }
            StateError::Contention { .. } => ErrorKind::Conflict,
            StateError::Validation(_) => ErrorKind::Validation,
            StateError::Store(e) => e.kind(),
        }
    }
}
