//! Unlock request lifecycle
//!
//! `Pending → Running → {Succeeded, Failed}`. A request creates exactly one
//! remediation job with a deterministic name, so a replayed `Pending` pass
//! adopts the job it already created. Deleting a request removes its job.

use crate::builder::RemediationJobBuilder;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::credentials::discover_credentials;
use crate::engine::Action;
use crate::error::{CredentialError, EngineError, PlatformError};
use crate::ledger::RemediationState;
use crate::metrics::{MetricsRecorder, NoopRecorder, UnlockTags};
use crate::platform::ClusterApi;
use crate::types::{BatchJob, JobConditionType, UnlockPhase, UnlockRequest};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Drives `UnlockRequest` resources to a terminal phase
pub struct UnlockRequestReconciler {
    api: Arc<dyn ClusterApi>,
    metrics: Arc<dyn MetricsRecorder>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl std::fmt::Debug for UnlockRequestReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockRequestReconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UnlockRequestReconciler {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: EngineConfig) -> Self {
        Self {
            api,
            metrics: Arc::new(NoopRecorder),
            clock: Arc::new(SystemClock),
            config,
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

    /// Reconcile one unlock request
    ///
    /// # Errors
    /// - `EngineError::ConflictRetriesExhausted` if every write conflicted
    /// - `EngineError::Platform` or `EngineError::Credential` on transient
    ///   platform failures; the request is left in its phase for a retry
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, EngineError> {
        let span = info_span!("reconcile_unlock_request", namespace, request = name);
        async {
            let mut attempts: u32 = 0;
            loop {
                let request = match self.api.get_unlock_request(namespace, name).await {
                    Ok(request) => request,
                    Err(e) if e.is_not_found() => return Ok(Action::await_change()),
                    Err(e) => return Err(e.into()),
                };
                match self.reconcile_once(request).await {
                    Err(e) if e.is_conflict() => {
                        attempts += 1;
                        if attempts > self.config.max_conflict_retries {
                            return Err(EngineError::ConflictRetriesExhausted { attempts });
                        }
                        warn!(attempts, "conflicting write, retrying from a fresh read");
                    }
                    other => return other,
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn reconcile_once(&self, mut request: UnlockRequest) -> Result<Action, EngineError> {
        let finalizer = self.config.finalizer();

        if request.metadata.is_deleting() {
            return self.finalize(request, &finalizer).await;
        }

        if request.metadata.add_finalizer(&finalizer) {
            request = self.api.update_unlock_request(&request).await?;
        }

        match request.phase() {
            UnlockPhase::Pending => self.start(request).await,
            UnlockPhase::Running => self.observe(request).await,
            UnlockPhase::Succeeded | UnlockPhase::Failed => {
                Ok(Action::requeue(self.config.terminal_revisit()))
            }
        }
    }

    async fn finalize(&self, mut request: UnlockRequest, finalizer: &str) -> Result<Action, EngineError> {
        if !request.metadata.has_finalizer(finalizer) {
            return Ok(Action::await_change());
        }
        if let Some(job_name) = request.status.job_name.clone() {
            match self.api.delete_job(request.target_namespace(), &job_name).await {
                Ok(()) => info!(job = %job_name, "deleted remediation job"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        request.metadata.remove_finalizer(finalizer);
        self.api.update_unlock_request(&request).await?;
        Ok(Action::await_change())
    }

    /// Create the remediation job and move to `Running`
    async fn start(&self, mut request: UnlockRequest) -> Result<Action, EngineError> {
        let now = self.clock.now();
        request.status.start_time.get_or_insert(now);
        let namespace = request.target_namespace().to_string();

        let discovered = discover_credentials(
            self.api.as_ref(),
            &self.config.credential_secret_patterns,
            &namespace,
            &request.spec.app_name,
            &request.spec.object_name,
            request.spec.repository_secret.as_deref(),
        )
        .await;
        let credential = match discovered {
            Ok(credential) => credential,
            Err(e @ CredentialError::NotFound { .. }) => return self.fail(request, e.to_string()).await,
            Err(e) => return Err(e.into()),
        };

        let built = RemediationJobBuilder::new(&self.config)
            .build_for_request(&request, &credential.secret_name);
        let job = match built {
            Ok(job) => job,
            Err(e) => return self.fail(request, e.to_string()).await,
        };

        let created = match self.api.create_job(job.clone()).await {
            Ok(created) => created,
            Err(PlatformError::AlreadyExists { .. }) => {
                let existing = self.api.get_job(job.namespace(), job.name()).await?;
                if !existing.metadata.is_owned_by(&request.metadata.uid) {
                    let message = format!("job name {} is taken by another object", job.name());
                    return self.fail(request, message).await;
                }
                debug!(job = existing.name(), "adopting remediation job");
                existing
            }
            Err(e) => return Err(e.into()),
        };

        request.status.phase = Some(UnlockPhase::Running);
        request.status.job_name = Some(created.name().to_string());
        request.status.message = Some(format!("remediation job {} created", created.name()));
        self.api.update_unlock_request_status(&request).await?;

        let tags = self.tags(&request);
        self.metrics.unlock_created(&tags);
        self.metrics.active_unlocks_changed(&tags, 1);
        info!(job = created.name(), secret = %credential.secret_name, "remediation job created");
        Ok(Action::requeue(self.config.requeue_interval()))
    }

    /// Follow the remediation job to completion
    async fn observe(&self, request: UnlockRequest) -> Result<Action, EngineError> {
        let Some(job_name) = request.status.job_name.clone() else {
            return self.fail(request, "no remediation job recorded".to_string()).await;
        };

        let fetched = self.api.get_job(request.target_namespace(), &job_name).await;
        let job = match fetched {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                return self
                    .finish(request, UnlockPhase::Failed, "remediation job disappeared".to_string())
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        match RemediationState::of(&job) {
            RemediationState::Running => Ok(Action::requeue(self.config.requeue_interval())),
            RemediationState::Succeeded => {
                self.finish(request, UnlockPhase::Succeeded, "repository unlocked".to_string())
                    .await
            }
            RemediationState::Failed => {
                let message = failure_message(&job);
                self.finish(request, UnlockPhase::Failed, message).await
            }
        }
    }

    /// Terminal transition of a request whose job was running
    async fn finish(
        &self,
        mut request: UnlockRequest,
        phase: UnlockPhase,
        message: String,
    ) -> Result<Action, EngineError> {
        request.status.phase = Some(phase);
        request.status.message = Some(message);
        request.status.completion_time = Some(self.clock.now());
        self.api.update_unlock_request_status(&request).await?;

        let tags = self.tags(&request);
        if phase == UnlockPhase::Succeeded {
            self.metrics.unlock_succeeded(&tags);
            info!("unlock request succeeded");
        } else {
            self.metrics.unlock_failed(&tags);
            warn!(message = ?request.status.message, "unlock request failed");
        }
        self.metrics.active_unlocks_changed(&tags, -1);
        Ok(Action::requeue(self.config.terminal_revisit()))
    }

    /// Terminal failure before any job ran
    async fn fail(&self, mut request: UnlockRequest, message: String) -> Result<Action, EngineError> {
        error!(%message, "unlock request failed");
        request.status.phase = Some(UnlockPhase::Failed);
        request.status.message = Some(message);
        request.status.completion_time = Some(self.clock.now());
        self.api.update_unlock_request_status(&request).await?;
        Ok(Action::requeue(self.config.terminal_revisit()))
    }

    fn tags(&self, request: &UnlockRequest) -> UnlockTags {
        UnlockTags::new(
            request.target_namespace(),
            &request.spec.app_name,
            &request.spec.object_name,
        )
    }
}

fn failure_message(job: &BatchJob) -> String {
    job.condition_message(JobConditionType::Failed)
        .filter(|m| !m.is_empty())
        .map_or_else(|| "remediation job failed".to_string(), |m| format!("remediation job failed: {m}"))
}
