//! Priority scheduler with duplicate filtering and snapshots
//!
//! Pending requests are ordered by priority (higher first), FIFO within a
//! priority. A fingerprint set rejects requests for work already enqueued or
//! dispatched during this crawl; retries opt out via `dont_filter`. The whole
//! scheduler state round-trips through a JSON snapshot in the job directory,
//! so an interrupted crawl resumes without repeating completed fetches.

use crate::model::Request;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "queue.json";

#[derive(Debug, Serialize, Deserialize)]
struct QueuedRequest {
    request: Request,
    /// Insertion sequence, used as the FIFO tiebreaker
    seq: u64,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower seq (earlier insert)
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// On-disk form of the scheduler state
#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub pending: Vec<Request>,
    pub seen: Vec<String>,
    pub next_seq: u64,
}

/// Priority queue of pending requests with duplicate suppression
pub struct Scheduler {
    queue: BinaryHeap<QueuedRequest>,
    seen: HashSet<String>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            seen: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Enqueues a request, returning false when the duplicate filter drops it
    ///
    /// The fingerprint is recorded on first sight and never evicted, so a
    /// request stays filtered even after it has been dispatched. Requests
    /// flagged `dont_filter` (retries, artifact re-fetches) always enter the
    /// queue and leave the filter untouched.
    pub fn enqueue(&mut self, request: Request) -> bool {
        if !request.dont_filter {
            let fingerprint = request.fingerprint();
            if !self.seen.insert(fingerprint) {
                tracing::trace!(url = %request.url, "duplicate request filtered");
                return false;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedRequest { request, seq });
        true
    }

    /// Pops the highest-priority pending request
    pub fn next(&mut self) -> Option<Request> {
        self.queue.pop().map(|q| q.request)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Captures the pending queue and the duplicate filter
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut queued: Vec<&QueuedRequest> = self.queue.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        SchedulerSnapshot {
            pending: queued.into_iter().map(|q| q.request.clone()).collect(),
            seen: self.seen.iter().cloned().collect(),
            next_seq: self.next_seq,
        }
    }

    /// Writes the snapshot to `<jobdir>/queue.json` atomically
    pub fn persist(&self, jobdir: &Path) -> crate::Result<()> {
        std::fs::create_dir_all(jobdir)?;
        let snapshot = self.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)?;

        // Write-then-rename so a crash never leaves a torn snapshot
        let tmp = jobdir.join(format!("{}.tmp", SNAPSHOT_FILE));
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, jobdir.join(SNAPSHOT_FILE))?;

        tracing::debug!(
            pending = snapshot.pending.len(),
            seen = snapshot.seen.len(),
            "scheduler snapshot written"
        );
        Ok(())
    }

    /// Restores a scheduler from `<jobdir>/queue.json`
    ///
    /// Returns `Ok(None)` when no snapshot exists.
    pub fn resume(jobdir: &Path) -> crate::Result<Option<Self>> {
        let path = snapshot_path(jobdir);
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read(&path)?;
        let snapshot: SchedulerSnapshot = serde_json::from_slice(&json)?;

        let mut scheduler = Self::new();
        scheduler.seen = snapshot.seen.into_iter().collect();
        scheduler.next_seq = snapshot.next_seq;
        for request in snapshot.pending {
            let seq = scheduler.next_seq;
            scheduler.next_seq += 1;
            scheduler.queue.push(QueuedRequest { request, seq });
        }

        tracing::info!(
            pending = scheduler.queue.len(),
            seen = scheduler.seen.len(),
            "resumed scheduler from snapshot"
        );
        Ok(Some(scheduler))
    }

    /// Deletes any snapshot so the next run starts fresh
    pub fn discard_snapshot(jobdir: &Path) -> crate::Result<()> {
        let path = snapshot_path(jobdir);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_path(jobdir: &Path) -> PathBuf {
    jobdir.join(SNAPSHOT_FILE)
}
