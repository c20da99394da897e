//! Monitor reconciliation
//!
//! One pass per monitor, run sequentially:
//! scan → classify → gate → build/create → ledger update → active refresh →
//! bounded trim → status write.
//!
//! The status write is optimistic. A conflicting write discards the pass
//! (including its metric events) and recomputes it from a fresh read.
//! Replaying a pass is idempotent: processed failures are skipped through
//! the ledger, and remediation jobs whose ledger entry was lost are adopted
//! through their correlation annotation instead of being created twice.

use crate::builder::{alert_fingerprint, keys, label_value, RemediationJobBuilder, RemediationRequest};
use crate::classifier::{ClassifierCache, LockMatch};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::credentials::discover_credentials;
use crate::error::{EngineError, PlatformError};
use crate::gate::ConcurrencyGate;
use crate::ledger::{RemediationLedger, RemediationState};
use crate::metrics::{MetricsRecorder, NoopRecorder, ReconcileOutcome, UnlockTags};
use crate::platform::ClusterApi;
use crate::scanner::{FailedJobObservation, FailureScanner};
use crate::types::{ActiveUnlock, BatchJob, JobKey, Monitor, MonitorPhase, MonitorStatus, ProcessedJob};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What the caller should do after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Revisit after `duration`
    #[inline]
    #[must_use]
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Revisit only on the next change of the object
    #[inline]
    #[must_use]
    pub fn await_change() -> Self {
        Self { requeue_after: None }
    }

    #[inline]
    #[must_use]
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Metric event held back until the pass's status write lands
#[derive(Debug, Clone)]
enum PassEvent {
    LockError(UnlockTags, String),
    Created(UnlockTags),
    Succeeded(UnlockTags),
    Failed(UnlockTags),
    Active(UnlockTags, i64),
}

/// Counts reported at the end of a pass
#[derive(Debug, Clone, Copy, Default)]
struct PassSummary {
    candidates: usize,
    created: usize,
    adopted: usize,
    denied: usize,
    unmatched: usize,
}

/// Remediation engine for `Monitor` resources
pub struct MonitorEngine {
    api: Arc<dyn ClusterApi>,
    metrics: Arc<dyn MetricsRecorder>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    classifiers: ClassifierCache,
    gate: ConcurrencyGate,
}

impl std::fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl MonitorEngine {
    /// Create an engine with no-op metrics on the system clock
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: EngineConfig) -> Self {
        let gate = ConcurrencyGate::new(config.default_max_concurrent_unlocks);
        Self {
            api,
            metrics: Arc::new(NoopRecorder),
            clock: Arc::new(SystemClock),
            config,
            classifiers: ClassifierCache::default(),
            gate,
        }
    }

    /// With metrics recorder
    #[inline]
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// With clock
    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile one monitor
    ///
    /// # Errors
    /// - `EngineError::ConflictRetriesExhausted` if every status write conflicted
    /// - `EngineError::Platform` if the monitor cannot be read or its
    ///   finalizer cannot be written
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, EngineError> {
        let span = info_span!(
            "reconcile_monitor",
            pass = %ulid::Ulid::new(),
            namespace,
            monitor = name
        );
        self.reconcile_with_retry(namespace, name).instrument(span).await
    }

    async fn reconcile_with_retry(&self, namespace: &str, name: &str) -> Result<Action, EngineError> {
        let mut attempts: u32 = 0;
        loop {
            let monitor = match self.api.get_monitor(namespace, name).await {
                Ok(monitor) => monitor,
                Err(e) if e.is_not_found() => {
                    debug!("monitor is gone");
                    return Ok(Action::await_change());
                }
                Err(e) => return Err(e.into()),
            };

            match self.reconcile_once(monitor).await {
                Err(e) if e.is_conflict() => {
                    attempts += 1;
                    if attempts > self.config.max_conflict_retries {
                        error!(attempts, "giving up after repeated conflicts");
                        return Err(EngineError::ConflictRetriesExhausted { attempts });
                    }
                    warn!(attempts, error = %e, "conflicting write, recomputing pass from a fresh read");
                }
                other => return other,
            }
        }
    }

    async fn reconcile_once(&self, mut monitor: Monitor) -> Result<Action, EngineError> {
        let finalizer = self.config.finalizer();

        if monitor.metadata.is_deleting() {
            return self.finalize(monitor, &finalizer).await;
        }

        if monitor.metadata.add_finalizer(&finalizer) {
            monitor = self.api.update_monitor(&monitor).await?;
        }

        if !monitor.spec.enabled {
            return self.pause(monitor).await;
        }

        let mut status = monitor.status.clone();
        let mut events = Vec::new();
        match self.run_pass(&monitor, &mut status, &mut events).await {
            Ok(()) => {
                monitor.status = status;
                self.api.update_monitor_status(&monitor).await?;
                self.emit(events);
                self.metrics
                    .reconciliation(monitor.namespace(), monitor.name(), ReconcileOutcome::Success);
                Ok(Action::requeue(self.config.requeue_interval()))
            }
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => {
                error!(error = %e, "pass failed");
                monitor.status.phase = Some(MonitorPhase::Error);
                monitor.status.last_error = Some(e.to_string());
                monitor.status.observed_generation = monitor.metadata.generation;
                self.api.update_monitor_status(&monitor).await?;
                self.metrics
                    .reconciliation(monitor.namespace(), monitor.name(), ReconcileOutcome::Error);
                Ok(Action::requeue(self.config.error_retry()))
            }
        }
    }

    /// Delete owned remediation jobs and release the finalizer
    async fn finalize(&self, mut monitor: Monitor, finalizer: &str) -> Result<Action, EngineError> {
        if !monitor.metadata.has_finalizer(finalizer) {
            return Ok(Action::await_change());
        }
        for job in self.owned_jobs(&monitor).await? {
            match self.api.delete_job(job.namespace(), job.name()).await {
                Ok(()) => info!(job = job.name(), namespace = job.namespace(), "deleted remediation job"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        monitor.metadata.remove_finalizer(finalizer);
        self.api.update_monitor(&monitor).await?;
        info!("monitor finalized");
        Ok(Action::await_change())
    }

    async fn pause(&self, mut monitor: Monitor) -> Result<Action, EngineError> {
        let status = &monitor.status;
        let changed = status.phase != Some(MonitorPhase::Paused)
            || status.observed_generation != monitor.metadata.generation
            || status.last_error.is_some();
        if changed {
            monitor.status.phase = Some(MonitorPhase::Paused);
            monitor.status.last_error = None;
            monitor.status.observed_generation = monitor.metadata.generation;
            self.api.update_monitor_status(&monitor).await?;
            info!("monitor paused");
        }
        self.metrics
            .reconciliation(monitor.namespace(), monitor.name(), ReconcileOutcome::Paused);
        Ok(Action::requeue(self.config.paused_requeue()))
    }

    /// One pass over an enabled monitor, mutating only `status`
    async fn run_pass(
        &self,
        monitor: &Monitor,
        status: &mut MonitorStatus,
        events: &mut Vec<PassEvent>,
    ) -> Result<(), EngineError> {
        let spec = &monitor.spec;
        let classifier = self.classifiers.get(&spec.lock_error_patterns);
        let mut errors: Vec<String> = classifier.errors().iter().map(ToString::to_string).collect();

        let scanner = FailureScanner::new(self.api.as_ref(), &self.config.default_name_prefix);
        let observations = scanner.scan(spec.job_selector.as_ref()).await?;
        let mut owned = self.owned_jobs(monitor).await?;

        let mut summary = PassSummary {
            candidates: observations.len(),
            ..PassSummary::default()
        };
        let mut ledger = RemediationLedger::new(status);

        let remediation_label = self.config.domain_key(keys::MONITOR);
        for observation in &observations {
            let key = observation.key();
            if ledger.is_processed(&key) {
                continue;
            }
            // remediation jobs share the mover prefix and are never remediated themselves
            if observation.job.metadata.labels.contains_key(&remediation_label) {
                continue;
            }

            let Some(found) = classifier.classify(&observation.text) else {
                debug!(job = %key, "failure is not a lock error");
                summary.unmatched += 1;
                continue;
            };

            let tags = tags_for(observation);

            if let Some(existing) = self.correlated_job(&owned, &key) {
                let running = RemediationState::of(existing) == RemediationState::Running;
                if running && !ledger.is_active_job(existing.namespace(), existing.name()) {
                    // the pass that created this job never committed; record it now
                    info!(job = %key, unlock_job = existing.name(), "adopting existing remediation job");
                    let started = existing
                        .metadata
                        .creation_timestamp
                        .unwrap_or_else(|| self.clock.now());
                    self.record_remediation(&mut ledger, observation, &found, existing, started, false);
                    events.push(PassEvent::LockError(tags.clone(), found.pattern.clone()));
                    events.push(PassEvent::Created(tags.clone()));
                    events.push(PassEvent::Active(tags, 1));
                    summary.adopted += 1;
                } else {
                    // entry was trimmed while the failure lingers; already counted
                    debug!(job = %key, unlock_job = existing.name(), "re-recording remediated failure");
                    ledger.record_processed(self.processed_entry(observation, &found, existing, false));
                }
                continue;
            }

            if !self
                .gate
                .admit(ledger.active_count(), spec.max_concurrent_unlocks)
            {
                info!(
                    job = %key,
                    active = ledger.active_count(),
                    "admission ceiling reached, deferring remediation"
                );
                summary.denied += 1;
                continue;
            }

            match self.remediate(monitor, observation, &found).await {
                Ok((job, removed)) => {
                    let now = self.clock.now();
                    self.record_remediation(&mut ledger, observation, &found, &job, now, removed);
                    events.push(PassEvent::LockError(tags.clone(), found.pattern.clone()));
                    events.push(PassEvent::Created(tags.clone()));
                    events.push(PassEvent::Active(tags, 1));
                    info!(job = %key, unlock_job = job.name(), removed, "created remediation job");
                    owned.push(job);
                    summary.created += 1;
                }
                Err(e) => {
                    warn!(job = %key, error = %e, "remediation failed, will retry next pass");
                    errors.push(format!("{key}: {e}"));
                }
            }
        }

        let outcome = ledger.refresh_active(&owned, |job| self.adopt_active(job));
        for unlock in &outcome.succeeded {
            let tags = UnlockTags::new(&unlock.namespace, &unlock.app_name, &unlock.object_name);
            events.push(PassEvent::Succeeded(tags.clone()));
            events.push(PassEvent::Active(tags, -1));
        }
        for unlock in &outcome.failed {
            let tags = UnlockTags::new(&unlock.namespace, &unlock.app_name, &unlock.object_name);
            events.push(PassEvent::Failed(tags.clone()));
            events.push(PassEvent::Active(tags, -1));
        }
        for unlock in &outcome.adopted {
            let tags = UnlockTags::new(&unlock.namespace, &unlock.app_name, &unlock.object_name);
            events.push(PassEvent::Active(tags, 1));
        }

        let evicted = ledger.trim(self.config.ledger_cap);

        info!(
            candidates = summary.candidates,
            created = summary.created,
            adopted = summary.adopted + outcome.adopted.len(),
            denied = summary.denied,
            unmatched = summary.unmatched,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            active = outcome.still_active,
            evicted,
            "pass complete"
        );

        status.phase = Some(MonitorPhase::Active);
        status.last_error = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };
        status.observed_generation = monitor.metadata.generation;
        Ok(())
    }

    /// Ledger bookkeeping for a remediation job now tracked for `observation`
    fn record_remediation(
        &self,
        ledger: &mut RemediationLedger<'_>,
        observation: &FailedJobObservation,
        found: &LockMatch,
        job: &BatchJob,
        started: DateTime<Utc>,
        removed: bool,
    ) {
        let key = observation.key();
        ledger.record_lock_error();
        ledger.record_processed(self.processed_entry(observation, found, job, removed));
        ledger.push_active(ActiveUnlock {
            app_name: observation.app_name.clone(),
            namespace: job.namespace().to_string(),
            object_name: observation.object_name.clone(),
            job_name: job.name().to_string(),
            start_time: started,
            alert_fingerprint: alert_fingerprint(&key.namespace, &key.name),
        });
        ledger.record_created(started, removed);
    }

    fn processed_entry(
        &self,
        observation: &FailedJobObservation,
        found: &LockMatch,
        job: &BatchJob,
        removed: bool,
    ) -> ProcessedJob {
        ProcessedJob {
            job_name: observation.name().to_string(),
            namespace: observation.namespace().to_string(),
            processed_time: self.clock.now(),
            unlock_job_name: job.name().to_string(),
            removed,
            lock_error: found.line.clone(),
        }
    }

    /// Discover credentials, build and create the job, optionally remove the failure
    async fn remediate(
        &self,
        monitor: &Monitor,
        observation: &FailedJobObservation,
        found: &LockMatch,
    ) -> Result<(BatchJob, bool), EngineError> {
        let credential = discover_credentials(
            self.api.as_ref(),
            &self.config.credential_secret_patterns,
            observation.namespace(),
            &observation.app_name,
            &observation.object_name,
            None,
        )
        .await?;

        let job = RemediationJobBuilder::new(&self.config).build(&RemediationRequest {
            monitor,
            observation,
            lock_error: &found.line,
            secret_name: &credential.secret_name,
            created_at: self.clock.now(),
        })?;

        let created = match self.api.create_job(job.clone()).await {
            Ok(created) => created,
            Err(PlatformError::AlreadyExists { .. }) => {
                let existing = self.api.get_job(job.namespace(), job.name()).await?;
                let same_failure = existing
                    .metadata
                    .annotations
                    .get(&self.config.domain_key(keys::FAILED_JOB))
                    == Some(&observation.key().to_string());
                if !existing.metadata.is_owned_by(&monitor.metadata.uid) || !same_failure {
                    return Err(PlatformError::AlreadyExists {
                        kind: crate::platform::kind::JOB,
                        namespace: job.namespace().to_string(),
                        name: job.name().to_string(),
                    }
                    .into());
                }
                existing
            }
            Err(e) => return Err(e.into()),
        };

        let removed = monitor.spec.remove_failed_jobs && self.remove_failed_job(observation).await;
        Ok((created, removed))
    }

    async fn remove_failed_job(&self, observation: &FailedJobObservation) -> bool {
        match self
            .api
            .delete_job(observation.namespace(), observation.name())
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(job = %observation.key(), error = %e, "failed to remove failed job");
                false
            }
        }
    }

    /// Remediation jobs owned by `monitor`
    async fn owned_jobs(&self, monitor: &Monitor) -> Result<Vec<BatchJob>, PlatformError> {
        let selector = BTreeMap::from([(
            self.config.domain_key(keys::MONITOR),
            label_value(monitor.name()),
        )]);
        Ok(self
            .api
            .list_jobs_by_labels(&selector)
            .await?
            .into_iter()
            .filter(|job| job.metadata.is_owned_by(&monitor.metadata.uid))
            .collect())
    }

    /// Owned job created for the failed job `key`
    fn correlated_job<'o>(&self, owned: &'o [BatchJob], key: &JobKey) -> Option<&'o BatchJob> {
        let annotation = self.config.domain_key(keys::FAILED_JOB);
        let wanted = key.to_string();
        owned
            .iter()
            .find(|job| job.metadata.annotations.get(&annotation) == Some(&wanted))
    }

    /// Rebuild an active entry from a remediation job's correlation metadata
    fn adopt_active(&self, job: &BatchJob) -> Option<ActiveUnlock> {
        let meta = &job.metadata;
        let failed = meta.annotations.get(&self.config.domain_key(keys::FAILED_JOB))?;
        let (failed_namespace, failed_name) = failed.split_once('/')?;
        let label = |suffix: &str| {
            meta.labels
                .get(&self.config.domain_key(suffix))
                .cloned()
                .unwrap_or_default()
        };
        let fingerprint = meta
            .annotations
            .get(&self.config.domain_key(keys::ALERT_FINGERPRINT))
            .cloned()
            .unwrap_or_else(|| alert_fingerprint(failed_namespace, failed_name));
        info!(unlock_job = job.name(), "restoring untracked remediation job to active list");
        Some(ActiveUnlock {
            app_name: label(keys::APP),
            namespace: meta.namespace.clone(),
            object_name: label(keys::OBJECT),
            job_name: meta.name.clone(),
            start_time: meta.creation_timestamp.unwrap_or_else(|| self.clock.now()),
            alert_fingerprint: fingerprint,
        })
    }

    fn emit(&self, events: Vec<PassEvent>) {
        for event in events {
            match event {
                PassEvent::LockError(tags, pattern) => self.metrics.lock_error_detected(&tags, &pattern),
                PassEvent::Created(tags) => self.metrics.unlock_created(&tags),
                PassEvent::Succeeded(tags) => self.metrics.unlock_succeeded(&tags),
                PassEvent::Failed(tags) => self.metrics.unlock_failed(&tags),
                PassEvent::Active(tags, delta) => self.metrics.active_unlocks_changed(&tags, delta),
            }
        }
    }
}

fn tags_for(observation: &FailedJobObservation) -> UnlockTags {
    UnlockTags::new(
        observation.namespace(),
        &observation.app_name,
        &observation.object_name,
    )
}
