//! Failed-job discovery
//!
//! Provides the scanning half of a pass:
//! - Namespace scope resolution (explicit set or every visible namespace)
//! - Prefix and label selection of backup jobs
//! - Terminal-failure filtering
//! - App/object inference and candidate text gathering
//!
//! Enumeration is fail-closed: one namespace that cannot be listed aborts
//! the scan rather than reporting "no failures".

use crate::error::ScanError;
use crate::platform::ClusterApi;
use crate::types::{BatchJob, JobConditionType, JobKey, JobSelector, Pod};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Job name prefixes of the backup mover jobs
const MOVER_PREFIXES: &[&str] = &["volsync-src-", "volsync-dst-"];

/// Labels naming the application a job belongs to, in lookup order
const APP_LABELS: &[&str] = &["app", "app.kubernetes.io/name"];

/// A failed backup job, ready for classification
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJobObservation {
    pub job: BatchJob,
    pub pods: Vec<Pod>,
    pub app_name: String,
    pub object_name: String,
    /// Condition message, terminated messages and logs, in that order
    pub text: String,
}

impl FailedJobObservation {
    #[inline]
    #[must_use]
    pub fn key(&self) -> JobKey {
        self.job.metadata.key()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.job.name()
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.job.namespace()
    }
}

/// Check a job against a prefix and exact-match label requirements
#[must_use]
pub fn matches_selector(job: &BatchJob, prefix: &str, selector: Option<&JobSelector>) -> bool {
    if !job.name().starts_with(prefix) {
        return false;
    }
    selector.map_or(true, |s| job.metadata.matches_labels(&s.label_selector))
}

/// Drop the last `-suffix` of an object name (`prowlarr-nfs` -> `prowlarr`)
#[must_use]
pub fn guess_app_name(object: &str) -> String {
    match object.rsplit_once('-') {
        Some((head, _)) if !head.is_empty() => head.to_string(),
        _ => object.to_string(),
    }
}

/// Infer `(app, object)` for a failed job
///
/// Mover job names carry the object directly; otherwise an app label names
/// the app and the job name is the object; otherwise the selection prefix is
/// stripped and the first name segment is the app.
#[must_use]
pub fn infer_app_object(job: &BatchJob, prefix: &str) -> (String, String) {
    let name = job.name();

    for mover in MOVER_PREFIXES {
        if let Some(object) = name.strip_prefix(mover).filter(|o| !o.is_empty()) {
            return (guess_app_name(object), object.to_string());
        }
    }

    if let Some(app) = APP_LABELS
        .iter()
        .find_map(|label| job.metadata.labels.get(*label))
        .filter(|app| !app.is_empty())
    {
        return (app.clone(), name.to_string());
    }

    let object = name
        .strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .unwrap_or(name);
    let app = object.split('-').next().unwrap_or(object);
    (app.to_string(), object.to_string())
}

/// Enumerates failed backup jobs through the platform
pub struct FailureScanner<'a> {
    api: &'a dyn ClusterApi,
    default_prefix: &'a str,
}

impl<'a> FailureScanner<'a> {
    #[inline]
    #[must_use]
    pub fn new(api: &'a dyn ClusterApi, default_prefix: &'a str) -> Self {
        Self { api, default_prefix }
    }

    /// Prefix in force for `selector`
    #[must_use]
    pub fn prefix<'s>(&'s self, selector: Option<&'s JobSelector>) -> &'s str {
        selector
            .map(|s| s.name_prefix.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(self.default_prefix)
    }

    /// Namespaces to scan
    ///
    /// # Errors
    /// - `ScanError::ListNamespaces` if the scope is "all" and listing fails
    pub async fn namespaces(&self, selector: Option<&JobSelector>) -> Result<Vec<String>, ScanError> {
        if let Some(explicit) = selector.map(|s| &s.namespaces).filter(|n| !n.is_empty()) {
            return Ok(explicit.iter().cloned().collect());
        }
        let all: BTreeSet<String> = self
            .api
            .list_namespaces()
            .await
            .map_err(ScanError::ListNamespaces)?
            .into_iter()
            .collect();
        Ok(all.into_iter().collect())
    }

    /// Failed jobs matching `selector`, with their classification text
    ///
    /// # Errors
    /// - `ScanError` if any namespace or job enumeration fails
    pub async fn scan(
        &self,
        selector: Option<&JobSelector>,
    ) -> Result<Vec<FailedJobObservation>, ScanError> {
        let prefix = self.prefix(selector);
        let mut observations = Vec::new();

        for namespace in self.namespaces(selector).await? {
            let jobs = self
                .api
                .list_jobs(&namespace)
                .await
                .map_err(|source| ScanError::ListJobs {
                    namespace: namespace.clone(),
                    source,
                })?;

            for job in jobs {
                if !matches_selector(&job, prefix, selector) || !job.is_failed() {
                    continue;
                }
                if let Some(observation) = self.observe(job, prefix).await {
                    observations.push(observation);
                }
            }
        }

        debug!(count = observations.len(), "scan found failed jobs");
        Ok(observations)
    }

    /// Gather pods and text for one failed job
    ///
    /// A job whose pods cannot be listed is left for the next pass.
    async fn observe(&self, job: BatchJob, prefix: &str) -> Option<FailedJobObservation> {
        let pods = match self.api.list_job_pods(job.namespace(), job.name()).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(namespace = job.namespace(), job = job.name(), error = %e, "failed to list pods, skipping job");
                return None;
            }
        };

        let mut lines: Vec<String> = Vec::new();
        if let Some(message) = job.condition_message(JobConditionType::Failed) {
            lines.push(message.to_string());
        }
        for pod in &pods {
            lines.extend(pod.terminated_messages().map(str::to_string));
        }
        for pod in &pods {
            match self.api.pod_logs(&pod.metadata.namespace, &pod.metadata.name).await {
                Ok(logs) if !logs.is_empty() => lines.push(logs),
                Ok(_) => {}
                Err(e) => {
                    debug!(pod = %pod.metadata.name, error = %e, "skipping pod without logs");
                }
            }
        }

        let (app_name, object_name) = infer_app_object(&job, prefix);
        Some(FailedJobObservation {
            job,
            pods,
            app_name,
            object_name,
            text: lines.join("\n"),
        })
    }
}
