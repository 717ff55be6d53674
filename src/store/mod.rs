//! Persistence contracts for jobs and auditors.
//!
//! The core treats the document store as a collaborator: get by id, query by
//! field equality, newest-first listing and a conditional write keyed on the
//! prior status and revision. [`MemoryStore`] backs tests and single-shot
//! runs; [`FileStore`] snapshots the same state to a JSON file so a restarted
//! process can resume its jobs.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::state_machine::{Auditor, AuditorId, Job, JobId, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("auditor email already registered: {0}")]
    DuplicateEmail(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Field-equality filters supported by [`JobStore::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobQuery {
    Status(JobStatus),
    AnyStatus(Vec<JobStatus>),
    Auditor(AuditorId),
}

impl JobQuery {
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            JobQuery::Status(status) => job.status == *status,
            JobQuery::AnyStatus(statuses) => statuses.contains(&job.status),
            JobQuery::Auditor(id) => job.auditor_id.as_ref() == Some(id),
        }
    }
}

/// What the writer believes the stored record looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: JobStatus,
    pub revision: u64,
}

impl Precondition {
    pub fn of(job: &Job) -> Self {
        Self {
            status: job.status,
            revision: job.revision,
        }
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// Written; carries the stored copy with its new revision.
    Written(Job),
    /// The record changed underneath the writer; carries the current copy.
    Conflict(Job),
    /// No record with that id.
    Missing,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Oldest first, so queued work is picked in arrival order.
    async fn find(&self, query: &JobQuery, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Newest first by `created_at`.
    async fn recent(&self, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Replace the record only if it still matches `expected`. The stored
    /// revision becomes `expected.revision + 1`.
    async fn compare_and_swap(
        &self,
        expected: Precondition,
        job: &Job,
    ) -> Result<CasOutcome, StoreError>;
}

#[async_trait]
pub trait AuditorStore: Send + Sync {
    async fn insert_auditor(&self, auditor: &Auditor) -> Result<(), StoreError>;

    async fn get_auditor(&self, id: &AuditorId) -> Result<Option<Auditor>, StoreError>;

    async fn find_auditor_by_email(&self, email: &str) -> Result<Option<Auditor>, StoreError>;

    async fn list_auditors(&self) -> Result<Vec<Auditor>, StoreError>;
}
