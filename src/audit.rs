//! Human review: auditor registry, batch assignment, approve/reject.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::state_machine::{
    Auditor, AuditorId, Event, Job, JobId, JobStateMachine, JobStatus, StateError,
};
use crate::store::{AuditorStore, JobQuery, StoreError};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid auditor: {0}")]
    Validation(String),

    #[error("unknown auditor: {0}")]
    UnknownAuditor(AuditorId),

    #[error("{email} is already registered to auditor {existing}")]
    EmailTaken { email: String, existing: AuditorId },

    #[error("unknown decision `{0}`, expected `approve` or `reject`")]
    InvalidDecision(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::Validation(_) | AuditError::InvalidDecision(_) => ErrorKind::Validation,
            AuditError::UnknownAuditor(_) => ErrorKind::NotFound,
            AuditError::EmailTaken { .. } => ErrorKind::Conflict,
            AuditError::State(e) => e.kind(),
            AuditError::Store(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl FromStr for Decision {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approve),
            "reject" | "rejected" => Ok(Decision::Reject),
            other => Err(AuditError::InvalidDecision(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Allow assigning jobs that are not waiting for review yet.
    #[serde(default)]
    pub assign_any_status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedJob {
    pub job_id: JobId,
    pub reason: String,
}

/// Outcome of a batch assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignReport {
    pub assigned: Vec<JobId>,
    pub skipped: Vec<SkippedJob>,
}

pub struct AuditCoordinator {
    machine: JobStateMachine,
    auditors: Arc<dyn AuditorStore>,
    settings: AuditSettings,
}

impl AuditCoordinator {
    pub fn new(
        machine: JobStateMachine,
        auditors: Arc<dyn AuditorStore>,
        settings: AuditSettings,
    ) -> Self {
        Self {
            machine,
            auditors,
            settings,
        }
    }

    pub async fn register_auditor(&self, name: &str, email: &str) -> Result<Auditor, AuditError> {
        let name = name.trim();
        let email = email.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(AuditError::Validation("name is required".into()));
        }
        if !looks_like_email(&email) {
            return Err(AuditError::Validation(format!("`{email}` is not an email address")));
        }
        if let Some(existing) = self.auditors.find_auditor_by_email(&email).await? {
            return Err(AuditError::EmailTaken {
                email,
                existing: existing.id,
            });
        }
        // The store still rejects a duplicate that races past the lookup.
        let auditor = Auditor::new(name, email);
        self.auditors.insert_auditor(&auditor).await?;
        info!(auditor_id = %auditor.id, email = %auditor.email, "auditor registered");
        Ok(auditor)
    }

    pub async fn list_auditors(&self) -> Result<Vec<Auditor>, AuditError> {
        Ok(self.auditors.list_auditors().await?)
    }

    /// Assign every job in `job_ids` to `auditor_id`. Missing jobs and jobs
    /// not awaiting review are skipped and reported, never an error.
    pub async fn assign(
        &self,
        job_ids: &[JobId],
        auditor_id: &AuditorId,
    ) -> Result<AssignReport, AuditError> {
        if self.auditors.get_auditor(auditor_id).await?.is_none() {
            return Err(AuditError::UnknownAuditor(auditor_id.clone()));
        }
        let require = (!self.settings.assign_any_status).then_some(JobStatus::PendingAudit);

        let mut report = AssignReport::default();
        for id in job_ids {
            match self.machine.assign_auditor(id, auditor_id, require).await {
                Ok(_) => report.assigned.push(id.clone()),
                Err(e @ (StateError::NotFound(_)
                | StateError::StaleStage { .. }
                | StateError::Contention { .. })) => {
                    warn!(job_id = %id, auditor_id = %auditor_id, reason = %e, "assignment skipped");
                    report.skipped.push(SkippedJob {
                        job_id: id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(
            auditor_id = %auditor_id,
            assigned = report.assigned.len(),
            skipped = report.skipped.len(),
            "assignment batch done"
        );
        Ok(report)
    }

    /// Record the auditor's decision on a job in review. Issues are kept in
    /// the given order; blank lines are dropped.
    pub async fn review(
        &self,
        job_id: &JobId,
        decision: Decision,
        issues: Vec<String>,
    ) -> Result<Job, AuditError> {
        let event = match decision {
            Decision::Approve => Event::Approve,
            Decision::Reject => Event::Reject {
                issues: issues
                    .into_iter()
                    .map(|i| i.trim().to_string())
                    .filter(|i| !i.is_empty())
                    .collect(),
            },
        };
        let job = self
            .machine
            .transition_from(job_id, JobStatus::PendingAudit, event)
            .await?;
        Ok(job)
    }

    /// Send a rejected job back to provisioning, subject to the resubmit
    /// policy.
    pub async fn resubmit(&self, job_id: &JobId) -> Result<Job, AuditError> {
        let job = self
            .machine
            .transition_from(job_id, JobStatus::Rejected, Event::Resubmit)
            .await?;
        Ok(job)
    }

    /// Jobs assigned to `auditor_id`, oldest first.
    pub async fn queue_for(
        &self,
        auditor_id: &AuditorId,
        limit: usize,
    ) -> Result<Vec<Job>, AuditError> {
        let jobs = self
            .machine
            .store()
            .find(&JobQuery::Auditor(auditor_id.clone()), limit)
            .await?;
        Ok(jobs)
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
