//! Scheduler Module
//!
//! Runs monitors and unlock requests on the cadence their reconcilers ask
//! for. Each object's pass is sequential; distinct objects run concurrently.
//!
//! An object is due when:
//! - It has never been seen
//! - Its requeue deadline has passed
//! - Its generation or deletion state changed since the last run

use crate::engine::{Action, MonitorEngine};
use crate::error::{EngineError, PlatformError};
use crate::platform::ClusterApi;
use crate::types::{JobKey, ObjectMeta};
use crate::unlock::UnlockRequestReconciler;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Resource kinds the scheduler drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Monitor,
    UnlockRequest,
}

type ScheduleKey = (ObjectKind, JobKey);

#[derive(Debug, Clone, Copy)]
struct DueEntry {
    /// `None` waits for a change of the object
    at: Option<Instant>,
    generation: i64,
    deleting: bool,
}

/// Outcome of one scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub reconciled: usize,
    pub failed: usize,
}

/// Multi-object reconcile runner
pub struct ReconcileScheduler {
    api: Arc<dyn ClusterApi>,
    engine: Arc<MonitorEngine>,
    unlocks: Arc<UnlockRequestReconciler>,
    due: Mutex<BTreeMap<ScheduleKey, DueEntry>>,
    tick: Duration,
}

impl std::fmt::Debug for ReconcileScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileScheduler")
            .field("tracked", &self.due.lock().len())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl ReconcileScheduler {
    /// Create a scheduler ticking once per second
    #[must_use]
    pub fn new(
        api: Arc<dyn ClusterApi>,
        engine: Arc<MonitorEngine>,
        unlocks: Arc<UnlockRequestReconciler>,
    ) -> Self {
        Self {
            api,
            engine,
            unlocks,
            due: Mutex::new(BTreeMap::new()),
            tick: Duration::from_secs(1),
        }
    }

    /// With tick interval
    #[inline]
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Objects currently tracked
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.due.lock().len()
    }

    /// Reconcile every listed object regardless of due time
    ///
    /// # Errors
    /// - `PlatformError` if monitors or unlock requests cannot be listed
    pub async fn run_pass(&self) -> Result<RunReport, PlatformError> {
        self.run(true).await
    }

    /// Reconcile the objects that are due
    ///
    /// # Errors
    /// - `PlatformError` if monitors or unlock requests cannot be listed
    pub async fn run_due(&self) -> Result<RunReport, PlatformError> {
        self.run(false).await
    }

    /// Tick until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    debug!("scheduler shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_due().await {
                        warn!(error = %e, "listing failed, retrying next tick");
                    }
                }
            }
        }
    }

    async fn run(&self, force: bool) -> Result<RunReport, PlatformError> {
        let monitors = self.api.list_monitors().await?;
        let requests = self.api.list_unlock_requests().await?;

        let listed: Vec<(ScheduleKey, &ObjectMeta)> = monitors
            .iter()
            .map(|m| ((ObjectKind::Monitor, m.metadata.key()), &m.metadata))
            .chain(
                requests
                    .iter()
                    .map(|r| ((ObjectKind::UnlockRequest, r.metadata.key()), &r.metadata)),
            )
            .collect();

        let now = Instant::now();
        let targets: Vec<(ScheduleKey, i64, bool)> = {
            let mut due = self.due.lock();
            let present: BTreeSet<&ScheduleKey> = listed.iter().map(|(key, _)| key).collect();
            due.retain(|key, _| present.contains(key));
            listed
                .iter()
                .filter(|(key, meta)| force || is_due(due.get(key), meta, now))
                .map(|(key, meta)| (key.clone(), meta.generation, meta.is_deleting()))
                .collect()
        };

        let results = join_all(targets.iter().map(|((kind, key), _, _)| self.reconcile(*kind, key))).await;

        let mut report = RunReport::default();
        let finished = Instant::now();
        let mut due = self.due.lock();
        for ((key, generation, deleting), result) in targets.into_iter().zip(results) {
            report.reconciled += 1;
            let at = match result {
                Ok(action) => action.requeue_after().map(|after| finished + after),
                Err(e) => {
                    error!(kind = ?key.0, object = %key.1, error = %e, "reconcile failed");
                    report.failed += 1;
                    Some(finished + self.engine.config().error_retry())
                }
            };
            due.insert(
                key,
                DueEntry {
                    at,
                    generation,
                    deleting,
                },
            );
        }
        Ok(report)
    }

    async fn reconcile(&self, kind: ObjectKind, key: &JobKey) -> Result<Action, EngineError> {
        match kind {
            ObjectKind::Monitor => self.engine.reconcile(&key.namespace, &key.name).await,
            ObjectKind::UnlockRequest => self.unlocks.reconcile(&key.namespace, &key.name).await,
        }
    }
}

fn is_due(entry: Option<&DueEntry>, meta: &ObjectMeta, now: Instant) -> bool {
    match entry {
        None => true,
        Some(entry) => {
            entry.generation != meta.generation
                || entry.deleting != meta.is_deleting()
                || entry.at.is_some_and(|at| at <= now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_objects_are_due() {
        let meta = ObjectMeta::new("media", "volsync-monitor");
        assert!(is_due(None, &meta, Instant::now()));
    }

    #[test]
    fn waiting_objects_run_on_change_only() {
        let now = Instant::now();
        let mut meta = ObjectMeta::new("media", "volsync-monitor");
        meta.generation = 1;
        let entry = DueEntry {
            at: None,
            generation: 1,
            deleting: false,
        };
        assert!(!is_due(Some(&entry), &meta, now));
        meta.generation = 2;
        assert!(is_due(Some(&entry), &meta, now));
    }

    #[test]
    fn deadlines_gate_reruns() {
        let now = Instant::now();
        let meta = ObjectMeta::new("media", "volsync-monitor");
        let later = DueEntry {
            at: Some(now + Duration::from_secs(30)),
            generation: 0,
            deleting: false,
        };
        assert!(!is_due(Some(&later), &meta, now));
        assert!(is_due(Some(&later), &meta, now + Duration::from_secs(31)));
    }
}
