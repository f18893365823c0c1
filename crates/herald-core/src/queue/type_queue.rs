//! Ordered collection of the jobs of one job type.

use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::QueueStats;
use crate::domain::job::offset;
use crate::domain::{Job, JobId, JobStatus};

/// Jobs of a single type, kept sorted by `(priority desc, scheduled_at asc)`.
///
/// Design:
/// - Queue depth per type is expected to be small, so a sorted `Vec` with an
///   O(n) readiness scan is enough.
/// - The sort is stable: jobs that tie on both keys keep insertion order.
/// - Any change to `priority` or `scheduled_at` must go through a method that
///   re-sorts (see [`TypeQueue::update`]).
#[derive(Debug, Default)]
pub struct TypeQueue {
    jobs: Vec<Job>,
}

impl TypeQueue {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.push(job);
        self.resort();
    }

    /// First job in order that may be dispatched at `now`.
    pub fn next_ready(&self, now: DateTime<Utc>) -> Option<&Job> {
        self.jobs.iter().find(|job| job.is_ready(now))
    }

    pub fn get(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == job_id)
    }

    /// Mutate one job in place, then restore ordering.
    ///
    /// Returns `None` if the job is not in this queue.
    pub fn update<R>(&mut self, job_id: JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let job = self.jobs.iter_mut().find(|job| job.id == job_id)?;
        let result = f(job);
        self.resort();
        Some(result)
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.id == job_id)?;
        Some(self.jobs.remove(index))
    }

    /// Remove every job; returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.jobs.len();
        self.jobs.clear();
        count
    }

    /// Drop completed jobs whose observation window has passed.
    pub fn purge_completed(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| match (job.status, job.completed_at) {
            (JobStatus::Completed, Some(done)) => offset(done, retention) > now,
            _ => true,
        });
        before - self.jobs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Counts by status. `is_busy` / `is_paused` are filled in by the caller.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.jobs.len(),
            ..QueueStats::default()
        };
        for job in &self.jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn resort(&mut self) {
        // slice::sort_by_key is stable
        self.jobs
            .sort_by_key(|job| (Reverse(job.priority), job.scheduled_at));
    }
}
