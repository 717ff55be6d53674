use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::job::{AuditorId, Job, JobId, JobInput, JobStatus, LogEntry};
use super::state::{self, Event, InvalidTransition, ResubmitPolicy};
use crate::notify::{ChangeFeed, JobChange};
use crate::provisioning::validate;
use crate::store::{CasOutcome, JobStore, Precondition, StoreError};

const DEFAULT_CONFLICT_RETRIES: u32 = 8;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid transition: {0}")]
    InvalidTransition(InvalidTransition),

    #[error("job {job_id} is `{actual}`, expected `{expected}`")]
    StaleStage {
        job_id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("gave up on job {job_id} after {attempts} conflicting writes")]
    Contention { job_id: JobId, attempts: u32 },

    #[error("invalid job input: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Sole writer of job records.
///
/// Every mutation is read → modify a copy → conditional write on the prior
/// status and revision. A writer that loses the race re-reads and
/// re-validates, so two writers observing the same status can never both
/// advance it.
#[derive(Clone)]
pub struct JobStateMachine {
    store: Arc<dyn JobStore>,
    policy: ResubmitPolicy,
    conflict_retries: u32,
    changes: ChangeFeed,
}

impl JobStateMachine {
    pub fn new(store: Arc<dyn JobStore>, policy: ResubmitPolicy) -> Self {
        Self {
            store,
            policy,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            changes: ChangeFeed::new(),
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries.max(1);
        self
    }

    pub fn with_change_feed(mut self, changes: ChangeFeed) -> Self {
        self.changes = changes;
        self
    }

    pub fn policy(&self) -> &ResubmitPolicy {
        &self.policy
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate `input` and persist a new `Queued` job.
    pub async fn create(&self, input: JobInput) -> Result<Job, StateError> {
        let input = normalize_input(input)?;
        let mut job = Job::new(input);
        job.logs.push(LogEntry::info(format!(
            "job created for {} with blueprint {}",
            job.input.domain, job.input.blueprint_id
        )));
        self.store.insert(&job).await?;
        info!(job_id = %job.id, domain = %job.input.domain, "job queued");
        self.publish(&job);
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Result<Job, StateError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.clone()))
    }

    /// Apply `event` to whatever status the job is in now.
    pub async fn transition(&self, id: &JobId, event: Event) -> Result<Job, StateError> {
        self.commit(id, None, event).await
    }

    /// Apply `event` only while the job is still in `stage`. Stage workers
    /// use this so a late result never lands on a job that moved on.
    pub async fn transition_from(
        &self,
        id: &JobId,
        stage: JobStatus,
        event: Event,
    ) -> Result<Job, StateError> {
        self.commit(id, Some(stage), event).await
    }

    /// Raise progress inside `stage`, optionally logging a note. A call
    /// that neither raises progress nor logs leaves the job untouched.
    pub async fn record_progress(
        &self,
        id: &JobId,
        stage: JobStatus,
        percent: u8,
        note: Option<&str>,
    ) -> Result<Job, StateError> {
        self.write_with(id, Some(stage), |job| {
            Ok(state::advance_progress(job, percent, note))
        })
        .await
    }

    /// Set `auditor_id`. With `require` set the job must be in that status.
    pub async fn assign_auditor(
        &self,
        id: &JobId,
        auditor: &AuditorId,
        require: Option<JobStatus>,
    ) -> Result<Job, StateError> {
        self.write_with(id, require, |job| {
            job.auditor_id = Some(auditor.clone());
            job.logs
                .push(LogEntry::info(format!("assigned to auditor {auditor}")));
            job.updated_at = chrono::Utc::now();
            Ok(true)
        })
        .await
    }

    async fn commit(
        &self,
        id: &JobId,
        stage: Option<JobStatus>,
        event: Event,
    ) -> Result<Job, StateError> {
        let kind = event.kind();
        let policy = &self.policy;
        let job = self
            .write_with(id, stage, |job| {
                let t = state::apply(job, event.clone(), policy)
                    .map_err(StateError::InvalidTransition)?;
                debug!(job_id = %job.id, from = %t.from, to = %t.to, event = %t.event, "transition");
                Ok(true)
            })
            .await?;
        info!(job_id = %job.id, status = %job.status, event = %kind, "job advanced");
        Ok(job)
    }

    /// Read-modify-write under optimistic concurrency. `mutate` returns
    /// false when it left the job as it was; nothing is written then.
    async fn write_with<F>(
        &self,
        id: &JobId,
        stage: Option<JobStatus>,
        mut mutate: F,
    ) -> Result<Job, StateError>
    where
        F: FnMut(&mut Job) -> Result<bool, StateError>,
    {
        let mut current = self.get(id).await?;
        for attempt in 1..=self.conflict_retries {
            if let Some(expected) = stage
                && current.status != expected
            {
                return Err(StateError::StaleStage {
                    job_id: id.clone(),
                    expected,
                    actual: current.status,
                });
            }

            let mut next = current.clone();
            if !mutate(&mut next)? {
                return Ok(current);
            }

            match self
                .store
                .compare_and_swap(Precondition::of(&current), &next)
                .await?
            {
                CasOutcome::Written(stored) => {
                    self.publish(&stored);
                    return Ok(stored);
                }
                CasOutcome::Conflict(latest) => {
                    debug!(job_id = %id, attempt, "conditional write lost, re-reading");
                    current = latest;
                }
                CasOutcome::Missing => return Err(StateError::NotFound(id.clone())),
            }
        }
        warn!(job_id = %id, attempts = self.conflict_retries, "write contention");
        Err(StateError::Contention {
            job_id: id.clone(),
            attempts: self.conflict_retries,
        })
    }

    fn publish(&self, job: &Job) {
        self.changes.publish(JobChange {
            job_id: job.id.clone(),
            status: job.status,
            revision: job.revision,
        });
    }
}

fn normalize_input(mut input: JobInput) -> Result<JobInput, StateError> {
    input.domain = input.domain.trim().to_ascii_lowercase();
    if !validate::is_valid_hostname(&input.domain) {
        return Err(StateError::Validation(format!(
            "`{}` is not a valid domain",
            input.domain
        )));
    }
    if let Some(public) = input.public_domain.as_mut() {
        *public = public.trim().to_ascii_lowercase();
        if !validate::is_valid_hostname(public) {
            return Err(StateError::Validation(format!(
                "`{public}` is not a valid public domain"
            )));
        }
    }
    if let Some(slug) = &input.client_slug
        && !validate::is_valid_slug(slug)
    {
        return Err(StateError::Validation(format!(
            "`{slug}` is not a valid client slug"
        )));
    }
    if input.blueprint_id.trim().is_empty() {
        return Err(StateError::Validation("blueprint id is required".into()));
    }
    if input.client_id.trim().is_empty() {
        return Err(StateError::Validation("client id is required".into()));
    }
    Ok(input)
}
