//! Change notifications for downstream caches (the admin UI's job lists).
//!
//! Every committed job write is published on a broadcast channel. Nobody
//! listening is fine; slow listeners lose the oldest messages.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::state_machine::{JobId, JobStatus};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobChange {
    pub job_id: JobId,
    pub status: JobStatus,
    pub revision: u64,
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<JobChange>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, change: JobChange) {
        // Err only means there are no receivers right now.
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_changes() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();
        feed.publish(JobChange {
            job_id: JobId::from("j-1"),
            status: JobStatus::Approved,
            revision: 7,
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.status, JobStatus::Approved);
        assert_eq!(got.revision, 7);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let feed = ChangeFeed::new();
        feed.publish(JobChange {
            job_id: JobId::from("j-1"),
            status: JobStatus::Queued,
            revision: 0,
        });
    }
}
