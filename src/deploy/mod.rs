//! Turns a job into files on a hosted site.

pub mod blueprint;
mod planner;

pub use blueprint::{Blueprint, BlueprintFile, BlueprintRegistry, FileSource, RenderContext};
pub use planner::{DeploymentPlan, DeploymentPlanner, PlannerSettings};

use thiserror::Error;

use crate::error::ErrorKind;
use crate::provisioning::ProvisioningError;
use crate::state_machine::FailureReason;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("cannot plan deployment: {0}")]
    Validation(String),

    #[error("unknown blueprint `{0}`")]
    UnknownBlueprint(String),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("{url} is not serving the deployed site")]
    VerificationFailed { url: String },
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Validation(_) | DeployError::UnknownBlueprint(_) => ErrorKind::Validation,
            DeployError::Provisioning(e) => e.kind(),
            DeployError::VerificationFailed { .. } => ErrorKind::Permanent,
        }
    }

    /// What a job failing with this error records.
    pub fn failure_reason(&self) -> FailureReason {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::PayloadTooLarge => FailureReason::Validation,
            ErrorKind::MaxRetriesExceeded => FailureReason::MaxRetriesExceeded,
            ErrorKind::Timeout => FailureReason::Timeout,
            _ => FailureReason::DeployFailed,
        }
    }
}
