// src/client/queue.rs
//! Durable queue of completed-but-unsent submissions.
//!
//! Entries live in a profile-scoped JSON file and survive reloads and
//! restarts. Append and remove are the only mutations; removal of a missing
//! entry is a no-op, which makes redelivery races harmless. De-duplication
//! is deliberately absent here: delivery is at-least-once and the server's
//! vote index is the arbiter of duplicates.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::SubmitRequest;

use super::api::PollClient;
use super::sync::{SyncRegistration, SYNC_TAG};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub id: Uuid,
    pub poll_id: i32,
    pub payload: SubmitRequest,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("queue storage error: {0}")]
pub struct QueueError(#[from] std::io::Error);

pub struct VoteQueue {
    path: PathBuf,
    registration: Arc<dyn SyncRegistration>,
    guard: Mutex<()>,
}

impl VoteQueue {
    pub fn new(path: impl Into<PathBuf>, registration: Arc<dyn SyncRegistration>) -> Self {
        Self {
            path: path.into(),
            registration,
            guard: Mutex::new(()),
        }
    }

    /// Persist a submission that could not be delivered, then ask the
    /// platform (best-effort) to wake us for a flush even if the tab closes.
    pub async fn enqueue(
        &self,
        poll_id: i32,
        payload: SubmitRequest,
    ) -> Result<QueuedSubmission, QueueError> {
        let entry = QueuedSubmission {
            id: Uuid::new_v4(),
            poll_id,
            payload,
            enqueued_at: Utc::now(),
        };

        {
            let _guard = self.guard.lock().await;
            let mut entries = self.load().await;
            entries.push(entry.clone());
            self.store(&entries).await?;
        }

        debug!(id = %entry.id, poll_id, "queued submission");
        self.registration.register(SYNC_TAG);
        Ok(entry)
    }

    /// Try to deliver every queued entry in enqueue order. Returns how many
    /// the server accepted. Entries the server reports as already recorded
    /// are dropped without counting; everything else that fails is retained
    /// for the next attempt.
    pub async fn flush(&self, api: &dyn PollClient) -> usize {
        let entries = self.pending().await;
        if entries.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for entry in entries {
            match api.submit(entry.poll_id, &entry.payload).await {
                Ok(accepted) => {
                    debug!(id = %entry.id, accepted = accepted.accepted, "delivered queued submission");
                    if let Err(e) = self.remove(entry.id).await {
                        // redelivery is safe: the server rejects the duplicate
                        warn!(id = %entry.id, "failed to drop delivered entry: {e}");
                    }
                    sent += 1;
                }
                Err(err) if err.is_already_submitted() => {
                    debug!(id = %entry.id, "already recorded server-side, dropping");
                    if let Err(e) = self.remove(entry.id).await {
                        warn!(id = %entry.id, "failed to drop duplicate entry: {e}");
                    }
                }
                Err(err) if err.is_connectivity() => {
                    debug!(id = %entry.id, "still unreachable, keeping: {err}");
                }
                Err(err) => {
                    warn!(id = %entry.id, "queued submission rejected, keeping: {err}");
                }
            }
        }
        sent
    }

    /// Current entries in enqueue order.
    pub async fn pending(&self) -> Vec<QueuedSubmission> {
        let _guard = self.guard.lock().await;
        self.load().await
    }

    pub async fn len(&self) -> usize {
        self.pending().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Manual reset; the only way an undeliverable entry ever leaves.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let _guard = self.guard.lock().await;
        self.store(&[]).await
    }

    async fn remove(&self, id: Uuid) -> Result<(), QueueError> {
        let _guard = self.guard.lock().await;
        let mut entries = self.load().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() != before {
            self.store(&entries).await?;
        }
        Ok(())
    }

    async fn load(&self) -> Vec<QueuedSubmission> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "unreadable queue file, starting empty: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    async fn store(&self, entries: &[QueuedSubmission]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(std::io::Error::other)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::sync::NoBackgroundSync;
    use crate::client::testing::{ballot, FakePollClient};
    use crate::client::ApiError;
    use std::collections::VecDeque;

    fn queue_at(dir: &tempfile::TempDir) -> VoteQueue {
        VoteQueue::new(dir.path().join("queued-votes.json"), Arc::new(NoBackgroundSync))
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(7, ballot("ada")).await.unwrap();

        let reopened = queue_at(&dir);
        let pending = reopened.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].poll_id, 7);
        assert_eq!(pending[0].payload, ballot("ada"));
    }

    #[tokio::test]
    async fn flush_of_empty_queue_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        let api = FakePollClient::default();

        assert_eq!(queue.flush(&api).await, 0);
        assert_eq!(api.submit_count(), 0);
    }

    #[tokio::test]
    async fn flush_delivers_in_enqueue_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(1, ballot("ada")).await.unwrap();
        queue.enqueue(2, ballot("grace")).await.unwrap();

        let api = FakePollClient::default();
        assert_eq!(queue.flush(&api).await, 2);

        assert!(queue.is_empty().await);
        let submits = api.submits.lock().unwrap();
        assert_eq!(submits.len(), 2);
        assert_eq!(submits[0].0, 1);
        assert_eq!(submits[1].0, 2);
    }

    #[tokio::test]
    async fn connectivity_failure_retains_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(1, ballot("ada")).await.unwrap();

        let api = FakePollClient::default();
        *api.submit_outcomes.lock().unwrap() =
            VecDeque::from([Err(ApiError::Connectivity("refused".into()))]);

        assert_eq!(queue.flush(&api).await, 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn already_submitted_is_dropped_but_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(1, ballot("ada")).await.unwrap();

        let api = FakePollClient::default();
        *api.submit_outcomes.lock().unwrap() = VecDeque::from([Err(ApiError::Rejected {
            code: "already_submitted".into(),
            message: "an identical submission was already recorded".into(),
        })]);

        assert_eq!(queue.flush(&api).await, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn other_rejections_are_retained() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(1, ballot("ada")).await.unwrap();

        let api = FakePollClient::default();
        *api.submit_outcomes.lock().unwrap() = VecDeque::from([Err(ApiError::Rejected {
            code: "poll_closed".into(),
            message: "poll is not open for submissions".into(),
        })]);

        assert_eq!(queue.flush(&api).await, 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn mixed_flush_keeps_only_failures() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(1, ballot("ada")).await.unwrap();
        queue.enqueue(2, ballot("grace")).await.unwrap();
        queue.enqueue(3, ballot("edsger")).await.unwrap();

        let api = FakePollClient::default();
        *api.submit_outcomes.lock().unwrap() = VecDeque::from([
            Ok(crate::models::SubmitAccepted { accepted: 1 }),
            Err(ApiError::Connectivity("refused".into())),
            Ok(crate::models::SubmitAccepted { accepted: 1 }),
        ]);

        assert_eq!(queue.flush(&api).await, 2);
        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].poll_id, 2);
    }

    #[tokio::test]
    async fn concurrent_enqueues_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(queue_at(&dir));

        let mut handles = Vec::new();
        for poll_id in 0..10 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(poll_id, ballot("ada")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len().await, 10);
    }

    #[tokio::test]
    async fn clear_empties_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue(1, ballot("ada")).await.unwrap();
        queue.clear().await.unwrap();
        assert!(queue.is_empty().await);
    }
}
