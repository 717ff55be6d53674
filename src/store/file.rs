use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::memory::{MemoryStore, StoreState};
use super::{AuditorStore, CasOutcome, JobQuery, JobStore, Precondition, StoreError};
use crate::state_machine::{Auditor, AuditorId, Job, JobId};

/// [`MemoryStore`] that rewrites a JSON snapshot after every mutation.
///
/// A mutation is applied to a copy of the state, the copy is written to a
/// sibling temp file and renamed over the target, and only then does it
/// replace the in-memory state. A failed write changes nothing.
#[derive(Debug)]
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileStore {
    /// Load the snapshot at `path`, or start empty when it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreState>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), jobs = state.jobs.len(), "opened job store");
        Ok(Self {
            inner: MemoryStore::from_state(state),
            path,
            writer: Mutex::new(()),
        })
    }

    /// Run `apply` against a copy of the current state and commit the copy
    /// once it is on disk. `apply` returns whether it changed anything.
    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut StoreState) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        // Held across the write so mutations commit one at a time, in order.
        let _guard = self.writer.lock().await;
        let mut candidate = self.inner.snapshot();
        let (out, changed) = apply(&mut candidate)?;
        if changed {
            self.persist(&candidate).await.inspect_err(|e| {
                warn!(path = %self.path.display(), error = %e, "snapshot write failed, change dropped");
            })?;
            self.inner.replace(candidate);
        }
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        self.mutate(|state| state.insert_job(job).map(|()| ((), true)))
            .await
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        self.inner.get(id).await
    }

    async fn find(&self, query: &JobQuery, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.inner.find(query, limit).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.inner.recent(limit).await
    }

    async fn compare_and_swap(
        &self,
        expected: Precondition,
        job: &Job,
    ) -> Result<CasOutcome, StoreError> {
        self.mutate(|state| {
            let outcome = state.compare_and_swap(expected, job);
            let written = matches!(outcome, CasOutcome::Written(_));
            Ok((outcome, written))
        })
        .await
    }
}

#[async_trait]
impl AuditorStore for FileStore {
    async fn insert_auditor(&self, auditor: &Auditor) -> Result<(), StoreError> {
        self.mutate(|state| state.insert_auditor(auditor).map(|()| ((), true)))
            .await
    }

    async fn get_auditor(&self, id: &AuditorId) -> Result<Option<Auditor>, StoreError> {
        self.inner.get_auditor(id).await
    }

    async fn find_auditor_by_email(&self, email: &str) -> Result<Option<Auditor>, StoreError> {
        self.inner.find_auditor_by_email(email).await
    }

    async fn list_auditors(&self) -> Result<Vec<Auditor>, StoreError> {
        self.inner.list_auditors().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{JobInput, JobStatus};

    fn job() -> Job {
        Job::new(JobInput {
            domain: "acme.biz".into(),
            public_domain: None,
            blueprint_id: "wp-starter".into(),
            client_id: "c-1".into(),
            client_slug: Some("acme".into()),
        })
    }

    #[tokio::test]
    async fn reopen_sees_previous_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/jobs.json");

        let original = job();
        {
            let store = FileStore::open(&path).await.unwrap();
            store.insert(&original).await.unwrap();
            let mut moved = original.clone();
            moved.status = JobStatus::Provisioning;
            store
                .compare_and_swap(Precondition::of(&original), &moved)
                .await
                .unwrap();
            store
                .insert_auditor(&Auditor::new("Ana", "ana@example.com"))
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&path).await.unwrap();
        let loaded = reopened.get(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Provisioning);
        assert_eq!(loaded.revision, 1);
        assert_eq!(reopened.list_auditors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nope.json")).await.unwrap();
        assert!(store.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let store = FileStore::open(state_dir.join("jobs.json")).await.unwrap();
        let original = job();
        store.insert(&original).await.unwrap();

        // A plain file where the snapshot directory should be.
        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, b"").unwrap();

        let mut moved = original.clone();
        moved.status = JobStatus::Scanning;
        assert!(
            store
                .compare_and_swap(Precondition::of(&original), &moved)
                .await
                .is_err()
        );
        let current = store.get(&original.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Queued);
        assert_eq!(current.revision, 0);

        let other = job();
        assert!(store.insert(&other).await.is_err());
        assert!(store.get(&other.id).await.unwrap().is_none());
        assert!(
            store
                .insert_auditor(&Auditor::new("Ana", "ana@example.com"))
                .await
                .is_err()
        );
        assert!(store.list_auditors().await.unwrap().is_empty());

        // Once the directory is back the same precondition still applies.
        std::fs::remove_file(&state_dir).unwrap();
        let outcome = store
            .compare_and_swap(Precondition::of(&original), &moved)
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Written(ref job) if job.revision == 1));
    }
}
