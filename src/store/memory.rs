use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{AuditorStore, CasOutcome, JobQuery, JobStore, Precondition, StoreError};
use crate::state_machine::{Auditor, AuditorId, Job, JobId};

/// Everything the store holds. Also the on-disk snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct StoreState {
    pub jobs: HashMap<JobId, Job>,
    pub auditors: HashMap<AuditorId, Auditor>,
}

impl StoreState {
    pub(super) fn insert_job(&mut self, job: &Job) -> Result<(), StoreError> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateJob(job.id.clone()));
        }
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    pub(super) fn compare_and_swap(&mut self, expected: Precondition, job: &Job) -> CasOutcome {
        let Some(current) = self.jobs.get_mut(&job.id) else {
            return CasOutcome::Missing;
        };
        if current.status != expected.status || current.revision != expected.revision {
            return CasOutcome::Conflict(current.clone());
        }
        let mut stored = job.clone();
        stored.revision = expected.revision + 1;
        *current = stored.clone();
        CasOutcome::Written(stored)
    }

    pub(super) fn insert_auditor(&mut self, auditor: &Auditor) -> Result<(), StoreError> {
        let taken = self
            .auditors
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&auditor.email));
        if taken {
            return Err(StoreError::DuplicateEmail(auditor.email.clone()));
        }
        self.auditors.insert(auditor.id.clone(), auditor.clone());
        Ok(())
    }
}

/// Thread-safe in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub(super) fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }

    pub(super) fn replace(&self, state: StoreState) {
        *self.state.write() = state;
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        self.state.write().insert_job(job)
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().jobs.get(id).cloned())
    }

    async fn find(&self, query: &JobQuery, limit: usize) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| query.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read();
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn compare_and_swap(
        &self,
        expected: Precondition,
        job: &Job,
    ) -> Result<CasOutcome, StoreError> {
        Ok(self.state.write().compare_and_swap(expected, job))
    }
}

#[async_trait]
impl AuditorStore for MemoryStore {
    async fn insert_auditor(&self, auditor: &Auditor) -> Result<(), StoreError> {
        self.state.write().insert_auditor(auditor)
    }

    async fn get_auditor(&self, id: &AuditorId) -> Result<Option<Auditor>, StoreError> {
        Ok(self.state.read().auditors.get(id).cloned())
    }

    async fn find_auditor_by_email(&self, email: &str) -> Result<Option<Auditor>, StoreError> {
        Ok(self
            .state
            .read()
            .auditors
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_auditors(&self) -> Result<Vec<Auditor>, StoreError> {
        let mut auditors: Vec<Auditor> = self.state.read().auditors.values().cloned().collect();
        auditors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(auditors)
    }
}
