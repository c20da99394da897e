//! Remediation ledger over a monitor's status
//!
//! The status is the only durable state of the engine. The ledger gives a
//! pass typed access to it:
//! - De-duplication of failed jobs by `namespace/name`
//! - A FIFO-bounded history of processed failures
//! - The active remediation list and its reconciliation against live jobs

use crate::types::{ActiveUnlock, BatchJob, JobConditionType, JobKey, MonitorStatus, ProcessedJob};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Observed state of a remediation job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationState {
    Running,
    Succeeded,
    Failed,
}

impl RemediationState {
    /// Classify a remediation job
    ///
    /// A failed pod only counts once no pod is active and none succeeded, as
    /// the job may still be retrying within its backoff limit.
    #[must_use]
    pub fn of(job: &BatchJob) -> Self {
        if job.is_succeeded() {
            Self::Succeeded
        } else if job.has_condition(JobConditionType::Failed)
            || (job.status.failed > 0 && job.status.active == 0)
        {
            Self::Failed
        } else {
            Self::Running
        }
    }
}

/// Result of reconciling the active list against live jobs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Entries still running after the refresh
    pub still_active: usize,
    /// Entries whose job succeeded
    pub succeeded: Vec<ActiveUnlock>,
    /// Entries whose job failed or disappeared
    pub failed: Vec<ActiveUnlock>,
    /// Live owned jobs restored into the active list
    pub adopted: Vec<ActiveUnlock>,
}

/// Typed view over a [`MonitorStatus`]
#[derive(Debug)]
pub struct RemediationLedger<'s> {
    status: &'s mut MonitorStatus,
}

impl<'s> RemediationLedger<'s> {
    #[inline]
    #[must_use]
    pub fn new(status: &'s mut MonitorStatus) -> Self {
        Self { status }
    }

    /// Whether a failed job already has a remediation decision
    #[must_use]
    pub fn is_processed(&self, key: &JobKey) -> bool {
        self.status
            .processed_jobs
            .iter()
            .any(|p| p.job_name == key.name && p.namespace == key.namespace)
    }

    /// Append a decision; returns false if the key was already recorded
    pub fn record_processed(&mut self, entry: ProcessedJob) -> bool {
        if self.is_processed(&JobKey::new(&entry.namespace, &entry.job_name)) {
            return false;
        }
        self.status.processed_jobs.push(entry);
        true
    }

    /// Track an in-flight remediation; returns false if its job is already tracked
    pub fn push_active(&mut self, unlock: ActiveUnlock) -> bool {
        if self.is_active_job(&unlock.namespace, &unlock.job_name) {
            return false;
        }
        self.status.active_unlocks.push(unlock);
        true
    }

    #[must_use]
    pub fn is_active_job(&self, namespace: &str, job_name: &str) -> bool {
        self.status
            .active_unlocks
            .iter()
            .any(|a| a.namespace == namespace && a.job_name == job_name)
    }

    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.status.active_unlocks.len()
    }

    #[inline]
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.status.processed_jobs.len()
    }

    /// Count an admitted lock-error candidate
    pub fn record_lock_error(&mut self) {
        self.status.total_lock_errors_detected += 1;
    }

    /// Count a created remediation job, and the failed job it removed if any
    pub fn record_created(&mut self, at: DateTime<Utc>, removed_failed_job: bool) {
        self.status.total_unlocks_created += 1;
        self.status.last_unlock_time = Some(at);
        if removed_failed_job {
            self.status.total_failed_jobs_removed += 1;
        }
    }

    /// Evict the oldest entries beyond `cap`; returns how many were evicted
    pub fn trim(&mut self, cap: usize) -> usize {
        let len = self.status.processed_jobs.len();
        if len <= cap {
            return 0;
        }
        let excess = len - cap;
        self.status.processed_jobs.drain(..excess);
        excess
    }

    /// Reconcile the active list against the monitor's live owned jobs
    ///
    /// Succeeded and failed entries are removed and counted into the totals;
    /// an entry whose job no longer exists counts as failed. Running owned
    /// jobs missing from the list are restored through `adopt`.
    pub fn refresh_active<F>(&mut self, owned: &[BatchJob], adopt: F) -> RefreshOutcome
    where
        F: Fn(&BatchJob) -> Option<ActiveUnlock>,
    {
        let by_key: BTreeMap<JobKey, &BatchJob> =
            owned.iter().map(|job| (job.metadata.key(), job)).collect();

        let mut outcome = RefreshOutcome::default();
        let mut still_active = Vec::with_capacity(self.status.active_unlocks.len());
        for unlock in self.status.active_unlocks.drain(..) {
            let key = JobKey::new(&unlock.namespace, &unlock.job_name);
            match by_key.get(&key).map(|job| RemediationState::of(job)) {
                Some(RemediationState::Running) => still_active.push(unlock),
                Some(RemediationState::Succeeded) => outcome.succeeded.push(unlock),
                Some(RemediationState::Failed) | None => outcome.failed.push(unlock),
            }
        }

        for job in owned {
            if RemediationState::of(job) != RemediationState::Running {
                continue;
            }
            let tracked = still_active
                .iter()
                .any(|a| a.namespace == job.namespace() && a.job_name == job.name());
            if tracked {
                continue;
            }
            if let Some(unlock) = adopt(job) {
                outcome.adopted.push(unlock.clone());
                still_active.push(unlock);
            }
        }

        self.status.total_unlocks_succeeded += outcome.succeeded.len() as i64;
        self.status.total_unlocks_failed += outcome.failed.len() as i64;
        outcome.still_active = still_active.len();
        self.status.active_unlocks = still_active;
        outcome
    }
}
