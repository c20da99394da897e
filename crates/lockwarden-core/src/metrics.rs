//! Remediation metrics events
//!
//! The engine only emits events through [`MetricsRecorder`]; storage and
//! export belong to whatever recorder the `metrics` facade is wired to.

use metrics::{counter, gauge};

pub const UNLOCK_JOBS_CREATED: &str = "volsync_unlock_jobs_created_total";
pub const UNLOCK_JOBS_SUCCEEDED: &str = "volsync_unlock_jobs_succeeded_total";
pub const UNLOCK_JOBS_FAILED: &str = "volsync_unlock_jobs_failed_total";
pub const ACTIVE_UNLOCK_JOBS: &str = "volsync_active_unlock_jobs";
pub const LOCK_ERRORS_DETECTED: &str = "volsync_lock_errors_detected_total";
pub const MONITOR_RECONCILIATIONS: &str = "volsync_monitor_reconciliations_total";

/// Labels attached to every remediation event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnlockTags {
    pub namespace: String,
    pub app: String,
    pub object: String,
}

impl UnlockTags {
    #[must_use]
    pub fn new(namespace: impl Into<String>, app: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            app: app.into(),
            object: object.into(),
        }
    }
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileOutcome {
    Success,
    Paused,
    Error,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

/// Sink for remediation events
#[cfg_attr(test, mockall::automock)]
pub trait MetricsRecorder: Send + Sync {
    fn unlock_created(&self, tags: &UnlockTags);

    fn unlock_succeeded(&self, tags: &UnlockTags);

    fn unlock_failed(&self, tags: &UnlockTags);

    /// Change of the active remediation gauge
    fn active_unlocks_changed(&self, tags: &UnlockTags, delta: i64);

    fn lock_error_detected(&self, tags: &UnlockTags, pattern: &str);

    fn reconciliation(&self, namespace: &str, monitor: &str, outcome: ReconcileOutcome);
}

/// Forwards events to the process-wide `metrics` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacade;

impl MetricsRecorder for MetricsFacade {
    fn unlock_created(&self, tags: &UnlockTags) {
        counter!(
            UNLOCK_JOBS_CREATED,
            "namespace" => tags.namespace.clone(),
            "app" => tags.app.clone(),
            "object" => tags.object.clone()
        )
        .increment(1);
    }

    fn unlock_succeeded(&self, tags: &UnlockTags) {
        counter!(
            UNLOCK_JOBS_SUCCEEDED,
            "namespace" => tags.namespace.clone(),
            "app" => tags.app.clone(),
            "object" => tags.object.clone()
        )
        .increment(1);
    }

    fn unlock_failed(&self, tags: &UnlockTags) {
        counter!(
            UNLOCK_JOBS_FAILED,
            "namespace" => tags.namespace.clone(),
            "app" => tags.app.clone(),
            "object" => tags.object.clone()
        )
        .increment(1);
    }

    fn active_unlocks_changed(&self, tags: &UnlockTags, delta: i64) {
        let gauge = gauge!(ACTIVE_UNLOCK_JOBS, "namespace" => tags.namespace.clone());
        #[allow(clippy::cast_precision_loss)]
        let amount = delta.unsigned_abs() as f64;
        if delta >= 0 {
            gauge.increment(amount);
        } else {
            gauge.decrement(amount);
        }
    }

    fn lock_error_detected(&self, tags: &UnlockTags, pattern: &str) {
        counter!(
            LOCK_ERRORS_DETECTED,
            "namespace" => tags.namespace.clone(),
            "app" => tags.app.clone(),
            "object" => tags.object.clone(),
            "pattern" => pattern.to_string()
        )
        .increment(1);
    }

    fn reconciliation(&self, namespace: &str, monitor: &str, outcome: ReconcileOutcome) {
        counter!(
            MONITOR_RECONCILIATIONS,
            "namespace" => namespace.to_string(),
            "monitor" => monitor.to_string(),
            "result" => outcome.as_str()
        )
        .increment(1);
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn unlock_created(&self, _tags: &UnlockTags) {}
    fn unlock_succeeded(&self, _tags: &UnlockTags) {}
    fn unlock_failed(&self, _tags: &UnlockTags) {}
    fn active_unlocks_changed(&self, _tags: &UnlockTags, _delta: i64) {}
    fn lock_error_detected(&self, _tags: &UnlockTags, _pattern: &str) {}
    fn reconciliation(&self, _namespace: &str, _monitor: &str, _outcome: ReconcileOutcome) {}
}
