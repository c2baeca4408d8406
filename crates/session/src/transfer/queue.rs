//! Bounded transfer job queue
//!
//! At most `max_parallel` jobs are active; the rest wait in FIFO order and
//! are admitted as slots free up. Admission bookkeeping lives in
//! [`JobTable`], which has no async parts.

use super::sender::TransferSender;
use crate::peer::PeerId;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Active,
    Complete,
    Error,
}

/// Why a job ended in [`TransferStatus::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No ack in time
    Timeout,
    /// Receiver reported corrupted content
    Integrity,
    /// Anything else: unreachable peer, abandoned transfer
    Transport,
}

impl FailureKind {
    pub fn of(error: &Error) -> Self {
        if error.is_integrity_error() {
            FailureKind::Integrity
        } else if matches!(error, Error::TransferTimeout(_)) {
            FailureKind::Timeout
        } else {
            FailureKind::Transport
        }
    }
}

/// One delivery of a payload to one peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferJob {
    pub id: String,
    pub peer_id: PeerId,
    pub filename: String,
    pub total_size: u64,
    pub status: TransferStatus,
    /// 0.0 ..= 1.0
    pub progress: f32,
    pub error: Option<String>,
}

impl TransferJob {
    pub fn new(id: impl Into<String>, peer_id: PeerId, filename: impl Into<String>, total_size: u64) -> Self {
        Self {
            id: id.into(),
            peer_id,
            filename: filename.into(),
            total_size,
            status: TransferStatus::Pending,
            progress: 0.0,
            error: None,
        }
    }
}

/// Job states plus FIFO admission
#[derive(Debug)]
pub struct JobTable {
    max_parallel: usize,
    jobs: Vec<TransferJob>,
    pending: VecDeque<String>,
}

impl JobTable {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            jobs: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn job_mut(&mut self, id: &str) -> Option<&mut TransferJob> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// Queue a job; returns the ids that became active
    ///
    /// A finished or failed job with the same id is replaced.
    ///
    /// # Errors
    ///
    /// Returns error if a job with this id is still pending or active.
    pub fn enqueue(&mut self, job: TransferJob) -> Result<Vec<String>> {
        if let Some(existing) = self.jobs.iter().position(|j| j.id == job.id) {
            match self.jobs[existing].status {
                TransferStatus::Pending | TransferStatus::Active => {
                    return Err(Error::InvalidState(format!(
                        "Transfer {} is already queued",
                        job.id
                    )));
                }
                TransferStatus::Complete | TransferStatus::Error => {
                    self.jobs.remove(existing);
                }
            }
        }

        let mut job = job;
        job.status = TransferStatus::Pending;
        job.progress = 0.0;
        job.error = None;
        self.pending.push_back(job.id.clone());
        self.jobs.push(job);
        Ok(self.admit())
    }

    /// Promote pending jobs while slots are free
    fn admit(&mut self) -> Vec<String> {
        let mut admitted = Vec::new();
        while self.active_count() < self.max_parallel {
            let Some(id) = self.pending.pop_front() else {
                break;
            };
            if let Some(job) = self.job_mut(&id) {
                job.status = TransferStatus::Active;
                admitted.push(id);
            }
        }
        admitted
    }

    pub fn set_progress(&mut self, id: &str, progress: f32) {
        if let Some(job) = self.job_mut(id) {
            if job.status == TransferStatus::Active {
                job.progress = progress.clamp(0.0, 1.0);
            }
        }
    }

    /// Mark an active job done; returns newly admitted ids
    pub fn complete(&mut self, id: &str) -> Vec<String> {
        if let Some(job) = self.job_mut(id) {
            if job.status == TransferStatus::Active {
                job.status = TransferStatus::Complete;
                job.progress = 1.0;
            }
        }
        self.admit()
    }

    /// Mark an active job failed; returns newly admitted ids
    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> Vec<String> {
        if let Some(job) = self.job_mut(id) {
            if job.status == TransferStatus::Active {
                job.status = TransferStatus::Error;
                job.error = Some(error.into());
            }
        }
        self.admit()
    }

    /// Put a failed job back at the end of the queue
    ///
    /// # Errors
    ///
    /// Returns error if the job is unknown or has not failed.
    pub fn retry(&mut self, id: &str) -> Result<Vec<String>> {
        let job = self
            .job_mut(id)
            .ok_or_else(|| Error::InvalidState(format!("Unknown transfer {}", id)))?;
        if job.status != TransferStatus::Error {
            return Err(Error::InvalidState(format!(
                "Transfer {} is {:?}, only failed transfers can be retried",
                id, job.status
            )));
        }
        job.status = TransferStatus::Pending;
        job.progress = 0.0;
        job.error = None;
        self.pending.push_back(id.to_string());
        Ok(self.admit())
    }

    pub fn job(&self, id: &str) -> Option<&TransferJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// All jobs in enqueue order
    pub fn jobs(&self) -> &[TransferJob] {
        &self.jobs
    }

    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == TransferStatus::Active)
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
        self.pending.clear();
    }
}

/// Progress and outcome notifications
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress {
        id: String,
        peer_id: PeerId,
        progress: f32,
    },
    Completed {
        id: String,
        peer_id: PeerId,
    },
    Failed {
        id: String,
        peer_id: PeerId,
        kind: FailureKind,
        error: String,
    },
}

struct QueuedPayload {
    mime_type: String,
    data: Bytes,
}

/// Runs queued jobs through a [`TransferSender`], `max_parallel` at a time
pub struct TransferQueue {
    sender: Arc<TransferSender>,
    table: Mutex<JobTable>,
    payloads: Mutex<HashMap<String, QueuedPayload>>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferQueue {
    pub fn new(
        sender: Arc<TransferSender>,
        max_parallel: usize,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sender,
            table: Mutex::new(JobTable::new(max_parallel)),
            payloads: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Queue `data` for delivery to `peer` as job `id`
    pub fn enqueue(
        self: &Arc<Self>,
        peer: PeerId,
        id: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
    ) -> Result<()> {
        let id = id.into();
        let job = TransferJob::new(id.clone(), peer, filename, data.len() as u64);

        let admitted = self.table.lock().enqueue(job)?;
        self.payloads.lock().insert(
            id.clone(),
            QueuedPayload {
                mime_type: mime_type.into(),
                data,
            },
        );
        info!("Transfer {} queued", id);

        for id in admitted {
            self.spawn_job(id);
        }
        Ok(())
    }

    /// Re-queue a failed job with its original payload
    pub fn retry(self: &Arc<Self>, id: &str) -> Result<()> {
        if !self.payloads.lock().contains_key(id) {
            return Err(Error::InvalidState(format!("No payload kept for transfer {}", id)));
        }
        let admitted = self.table.lock().retry(id)?;
        info!("Transfer {} re-queued", id);
        for id in admitted {
            self.spawn_job(id);
        }
        Ok(())
    }

    fn spawn_job(self: &Arc<Self>, id: String) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.run_job(id).await;
        });
    }

    async fn run_job(self: Arc<Self>, id: String) {
        let job = self.table.lock().job(&id).cloned();
        let payload = self
            .payloads
            .lock()
            .get(&id)
            .map(|p| (p.mime_type.clone(), p.data.clone()));
        let (Some(job), Some((mime_type, data))) = (job, payload) else {
            // Cleared while waiting for a slot
            return;
        };

        let reporter = Arc::clone(&self);
        let progress_id = id.clone();
        let progress_peer = job.peer_id.clone();
        let last_reported = Mutex::new(0.0f32);
        let result = self
            .sender
            .send_file(&job.peer_id, &id, &job.filename, &mime_type, &data, move |p| {
                reporter.table.lock().set_progress(&progress_id, p);
                let mut last = last_reported.lock();
                if p - *last >= 0.1 || (p >= 1.0 && *last < 1.0) {
                    *last = p;
                    let _ = reporter.events.send(TransferEvent::Progress {
                        id: progress_id.clone(),
                        peer_id: progress_peer.clone(),
                        progress: p,
                    });
                }
            })
            .await;

        let admitted = match result {
            Ok(()) => {
                self.payloads.lock().remove(&id);
                let _ = self.events.send(TransferEvent::Completed {
                    id: id.clone(),
                    peer_id: job.peer_id.clone(),
                });
                self.table.lock().complete(&id)
            }
            Err(e) => {
                let kind = FailureKind::of(&e);
                warn!("Transfer {} to {} failed ({:?}): {}", id, job.peer_id, kind, e);
                let _ = self.events.send(TransferEvent::Failed {
                    id: id.clone(),
                    peer_id: job.peer_id.clone(),
                    kind,
                    error: e.to_string(),
                });
                self.table.lock().fail(&id, e.to_string())
            }
        };

        for next in admitted {
            self.spawn_job(next);
        }
    }

    pub fn job(&self, id: &str) -> Option<TransferJob> {
        self.table.lock().job(id).cloned()
    }

    pub fn jobs(&self) -> Vec<TransferJob> {
        self.table.lock().jobs().to_vec()
    }

    /// Forget every job; active sends are abandoned
    pub fn clear(&self) {
        self.table.lock().clear();
        self.payloads.lock().clear();
        self.sender.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> TransferJob {
        TransferJob::new(id, "host".into(), format!("{}.webm", id), 100)
    }

    fn statuses(table: &JobTable) -> Vec<TransferStatus> {
        table.jobs().iter().map(|j| j.status).collect()
    }

    #[test]
    fn test_five_jobs_three_active() {
        use TransferStatus::*;
        let mut table = JobTable::new(3);

        let mut admitted = Vec::new();
        for id in ["j1", "j2", "j3", "j4", "j5"] {
            admitted.extend(table.enqueue(job(id)).unwrap());
        }
        assert_eq!(admitted, vec!["j1", "j2", "j3"]);
        assert_eq!(statuses(&table), vec![Active, Active, Active, Pending, Pending]);

        // Completing one promotes exactly one, in FIFO order
        assert_eq!(table.complete("j2"), vec!["j4"]);
        assert_eq!(statuses(&table), vec![Active, Complete, Active, Active, Pending]);
        assert_eq!(table.active_count(), 3);
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn test_failure_frees_slot_and_retry_requeues() {
        use TransferStatus::*;
        let mut table = JobTable::new(1);
        table.enqueue(job("a")).unwrap();
        table.enqueue(job("b")).unwrap();

        assert_eq!(table.fail("a", "timeout"), vec!["b"]);
        assert_eq!(table.job("a").unwrap().error.as_deref(), Some("timeout"));

        // Slot is taken by b, so the retried job waits
        assert!(table.retry("a").unwrap().is_empty());
        assert_eq!(statuses(&table), vec![Pending, Active]);
        assert_eq!(table.complete("b"), vec!["a"]);
    }

    #[test]
    fn test_retry_only_failed_jobs() {
        let mut table = JobTable::new(3);
        table.enqueue(job("a")).unwrap();
        assert!(table.retry("a").is_err());
        assert!(table.retry("missing").is_err());
    }

    #[test]
    fn test_duplicate_id_rejected_while_in_flight() {
        let mut table = JobTable::new(3);
        table.enqueue(job("a")).unwrap();
        assert!(table.enqueue(job("a")).is_err());

        table.complete("a");
        assert_eq!(table.enqueue(job("a")).unwrap(), vec!["a"]);
        assert_eq!(table.jobs().len(), 1);
    }

    #[test]
    fn test_progress_only_for_active_jobs() {
        let mut table = JobTable::new(1);
        table.enqueue(job("a")).unwrap();
        table.enqueue(job("b")).unwrap();

        table.set_progress("a", 0.4);
        table.set_progress("b", 0.9);
        table.set_progress("a", 7.0);
        assert_eq!(table.job("a").unwrap().progress, 1.0);
        assert_eq!(table.job("b").unwrap().progress, 0.0);
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            FailureKind::of(&Error::TransferTimeout("x".into())),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::of(&Error::TransferRejected("bad hash".into())),
            FailureKind::Integrity
        );
        assert_eq!(
            FailureKind::of(&Error::PeerNotFound("x".into())),
            FailureKind::Transport
        );
    }
}
