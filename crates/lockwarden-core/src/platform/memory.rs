//! In-memory platform
//!
//! A self-contained [`ClusterApi`] used by tests and by the CLI replay:
//! - Assigns uids, creation timestamps and monotonically increasing
//!   resource versions
//! - Rejects writes carrying a stale resource version
//! - Honours finalizers and garbage-collects jobs owned by removed objects
//! - Loads from and dumps to a YAML [`ClusterSnapshot`]
//! - Injects faults on demand

use super::{kind, ClusterApi, JOB_NAME_LABEL};
use crate::clock::{Clock, SystemClock};
use crate::error::PlatformError;
use crate::types::{BatchJob, JobKey, JobStatus, Monitor, ObjectMeta, Pod, Secret, UnlockRequest};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Serializable cluster contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<BatchJob>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<SnapshotPod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub monitors: Vec<Monitor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlock_requests: Vec<UnlockRequest>,
}

impl ClusterSnapshot {
    /// Parse a YAML snapshot
    ///
    /// # Errors
    /// - `serde_yaml::Error` on malformed input
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Render as YAML
    ///
    /// # Errors
    /// - `serde_yaml::Error` if a value cannot be represented
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Pod with its captured log text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPod {
    #[serde(flatten)]
    pub pod: Pod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_namespace_listing: bool,
    failing_namespaces: BTreeSet<String>,
    status_conflicts: u32,
    failing_job_creates: u32,
}

/// Objects with finalizer-aware, versioned storage
trait Stored: Clone {
    const KIND: &'static str;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

impl Stored for Monitor {
    const KIND: &'static str = kind::MONITOR;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Stored for UnlockRequest {
    const KIND: &'static str = kind::UNLOCK_REQUEST;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// In-memory [`ClusterApi`]
#[derive(Debug)]
pub struct InMemoryCluster {
    clock: Arc<dyn Clock>,
    version: AtomicU64,
    namespaces: Mutex<BTreeSet<String>>,
    jobs: DashMap<JobKey, BatchJob>,
    pods: DashMap<JobKey, Pod>,
    logs: DashMap<JobKey, String>,
    secrets: DashMap<JobKey, Secret>,
    monitors: DashMap<JobKey, Monitor>,
    unlock_requests: DashMap<JobKey, UnlockRequest>,
    faults: Mutex<Faults>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Create an empty cluster on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty cluster stamping objects with `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            version: AtomicU64::new(0),
            namespaces: Mutex::new(BTreeSet::new()),
            jobs: DashMap::new(),
            pods: DashMap::new(),
            logs: DashMap::new(),
            secrets: DashMap::new(),
            monitors: DashMap::new(),
            unlock_requests: DashMap::new(),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Load a snapshot, keeping any uids it carries
    #[must_use]
    pub fn from_snapshot(snapshot: ClusterSnapshot, clock: Arc<dyn Clock>) -> Self {
        let cluster = Self::with_clock(clock);
        for namespace in snapshot.namespaces {
            cluster.add_namespace(namespace);
        }
        for job in snapshot.jobs {
            cluster.insert_job(job);
        }
        for entry in snapshot.pods {
            let key = entry.pod.metadata.key();
            cluster.insert_pod(entry.pod);
            if let Some(logs) = entry.logs {
                cluster.logs.insert(key, logs);
            }
        }
        for secret in snapshot.secrets {
            cluster.insert_secret(secret);
        }
        for monitor in snapshot.monitors {
            cluster.insert_monitor(monitor);
        }
        for request in snapshot.unlock_requests {
            cluster.insert_unlock_request(request);
        }
        cluster
    }

    /// Dump the current contents, sorted by namespace and name
    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        let pods = sorted_values(&self.pods)
            .into_iter()
            .map(|pod| {
                let logs = self.logs.get(&pod.metadata.key()).map(|l| l.value().clone());
                SnapshotPod { pod, logs }
            })
            .collect();
        ClusterSnapshot {
            namespaces: self.namespaces.lock().iter().cloned().collect(),
            jobs: sorted_values(&self.jobs),
            pods,
            secrets: sorted_values(&self.secrets),
            monitors: sorted_values(&self.monitors),
            unlock_requests: sorted_values(&self.unlock_requests),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(self.clock.now());
        }
        meta.resource_version = self.next_version();
        self.add_namespace(meta.namespace.clone());
    }

    pub fn add_namespace(&self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        if !namespace.is_empty() {
            self.namespaces.lock().insert(namespace);
        }
    }

    /// Store a job, replacing any job with the same name
    pub fn insert_job(&self, mut job: BatchJob) -> BatchJob {
        self.stamp(&mut job.metadata);
        self.jobs.insert(job.metadata.key(), job.clone());
        job
    }

    pub fn insert_pod(&self, mut pod: Pod) -> Pod {
        self.stamp(&mut pod.metadata);
        self.pods.insert(pod.metadata.key(), pod.clone());
        pod
    }

    pub fn set_pod_logs(&self, namespace: &str, pod_name: &str, logs: impl Into<String>) {
        self.logs.insert(JobKey::new(namespace, pod_name), logs.into());
    }

    pub fn insert_secret(&self, mut secret: Secret) -> Secret {
        self.stamp(&mut secret.metadata);
        self.secrets.insert(secret.metadata.key(), secret.clone());
        secret
    }

    pub fn insert_monitor(&self, mut monitor: Monitor) -> Monitor {
        self.stamp(&mut monitor.metadata);
        monitor.metadata.generation = monitor.metadata.generation.max(1);
        self.monitors.insert(monitor.metadata.key(), monitor.clone());
        monitor
    }

    pub fn insert_unlock_request(&self, mut request: UnlockRequest) -> UnlockRequest {
        self.stamp(&mut request.metadata);
        request.metadata.generation = request.metadata.generation.max(1);
        self.unlock_requests
            .insert(request.metadata.key(), request.clone());
        request
    }

    /// Overwrite a job's observed status; returns false if the job is absent
    pub fn set_job_status(&self, namespace: &str, name: &str, status: JobStatus) -> bool {
        match self.jobs.get_mut(&JobKey::new(namespace, name)) {
            Some(mut job) => {
                job.status = status;
                job.metadata.resource_version = self.next_version();
                true
            }
            None => false,
        }
    }

    /// Remove a job without going through the API, as an external actor would
    pub fn remove_job(&self, namespace: &str, name: &str) -> Option<BatchJob> {
        self.drop_job(&JobKey::new(namespace, name))
    }

    #[must_use]
    pub fn job(&self, namespace: &str, name: &str) -> Option<BatchJob> {
        self.jobs
            .get(&JobKey::new(namespace, name))
            .map(|j| j.value().clone())
    }

    #[must_use]
    pub fn jobs(&self) -> Vec<BatchJob> {
        sorted_values(&self.jobs)
    }

    #[must_use]
    pub fn monitor(&self, namespace: &str, name: &str) -> Option<Monitor> {
        self.monitors
            .get(&JobKey::new(namespace, name))
            .map(|m| m.value().clone())
    }

    #[must_use]
    pub fn unlock_request(&self, namespace: &str, name: &str) -> Option<UnlockRequest> {
        self.unlock_requests
            .get(&JobKey::new(namespace, name))
            .map(|r| r.value().clone())
    }

    /// Request deletion of a monitor
    ///
    /// # Errors
    /// - `PlatformError::NotFound` if the monitor does not exist
    pub fn delete_monitor(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.delete_object(&self.monitors, namespace, name)
    }

    /// Request deletion of an unlock request
    ///
    /// # Errors
    /// - `PlatformError::NotFound` if the request does not exist
    pub fn delete_unlock_request(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.delete_object(&self.unlock_requests, namespace, name)
    }

    /// Fail namespace enumeration until reset
    pub fn fail_namespace_listing(&self, fail: bool) {
        self.faults.lock().fail_namespace_listing = fail;
    }

    /// Fail job enumeration in `namespace` until reset
    pub fn fail_job_listing_in(&self, namespace: &str, fail: bool) {
        let mut faults = self.faults.lock();
        if fail {
            faults.failing_namespaces.insert(namespace.to_string());
        } else {
            faults.failing_namespaces.remove(namespace);
        }
    }

    /// Fail the next `count` status writes with a conflict
    pub fn conflict_next_status_updates(&self, count: u32) {
        self.faults.lock().status_conflicts = count;
    }

    /// Fail the next `count` job creations
    pub fn fail_next_job_creates(&self, count: u32) {
        self.faults.lock().failing_job_creates = count;
    }

    fn drop_job(&self, key: &JobKey) -> Option<BatchJob> {
        let (_, job) = self.jobs.remove(key)?;
        self.pods.retain(|pod_key, pod| {
            pod_key.namespace != key.namespace
                || pod.metadata.labels.get(JOB_NAME_LABEL) != Some(&key.name)
        });
        self.logs.retain(|pod_key, _| self.pods.contains_key(pod_key));
        Some(job)
    }

    fn collect_garbage(&self, owner_uid: &str) {
        let orphaned: Vec<JobKey> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().metadata.is_owned_by(owner_uid))
            .map(|entry| entry.key().clone())
            .collect();
        for key in orphaned {
            tracing::debug!(job = %key, owner = owner_uid, "garbage collecting owned job");
            self.drop_job(&key);
        }
    }

    fn delete_object<T: Stored>(
        &self,
        map: &DashMap<JobKey, T>,
        namespace: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        let key = JobKey::new(namespace, name);
        let uid = {
            let mut stored = map
                .get_mut(&key)
                .ok_or_else(|| PlatformError::not_found(T::KIND, namespace, name))?;
            let meta = stored.meta_mut();
            if !meta.finalizers.is_empty() {
                if meta.deletion_timestamp.is_none() {
                    meta.deletion_timestamp = Some(self.clock.now());
                    meta.resource_version = self.next_version();
                }
                return Ok(());
            }
            meta.uid.clone()
        };
        map.remove(&key);
        self.collect_garbage(&uid);
        Ok(())
    }

    fn update_object<T: Stored>(
        &self,
        map: &DashMap<JobKey, T>,
        incoming: &T,
        apply: impl FnOnce(&mut T, &T),
    ) -> Result<T, PlatformError> {
        let key = incoming.meta().key();
        let updated = {
            let mut stored = map
                .get_mut(&key)
                .ok_or_else(|| PlatformError::not_found(T::KIND, &key.namespace, &key.name))?;
            check_version::<T>(stored.meta(), incoming.meta())?;
            apply(stored.value_mut(), incoming);
            stored.meta_mut().resource_version = self.next_version();
            stored.value().clone()
        };
        let meta = updated.meta();
        if meta.is_deleting() && meta.finalizers.is_empty() {
            map.remove(&key);
            self.collect_garbage(&meta.uid);
        }
        Ok(updated)
    }

    fn take_status_conflict<T: Stored>(&self, incoming: &T) -> Result<(), PlatformError> {
        let mut faults = self.faults.lock();
        if faults.status_conflicts > 0 {
            faults.status_conflicts -= 1;
            let meta = incoming.meta();
            return Err(PlatformError::Conflict {
                kind: T::KIND,
                namespace: meta.namespace.clone(),
                name: meta.name.clone(),
                expected: meta.resource_version,
            });
        }
        Ok(())
    }
}

fn check_version<T: Stored>(stored: &ObjectMeta, incoming: &ObjectMeta) -> Result<(), PlatformError> {
    if stored.resource_version == incoming.resource_version {
        Ok(())
    } else {
        Err(PlatformError::Conflict {
            kind: T::KIND,
            namespace: incoming.namespace.clone(),
            name: incoming.name.clone(),
            expected: incoming.resource_version,
        })
    }
}

fn sorted_values<T: Clone>(map: &DashMap<JobKey, T>) -> Vec<T> {
    let mut entries: Vec<(JobKey, T)> = map
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, value)| value).collect()
}

fn merge_metadata(stored: &mut ObjectMeta, incoming: &ObjectMeta) {
    stored.labels = incoming.labels.clone();
    stored.annotations = incoming.annotations.clone();
    stored.finalizers = incoming.finalizers.clone();
    stored.owner_references = incoming.owner_references.clone();
}

#[async_trait::async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, PlatformError> {
        if self.faults.lock().fail_namespace_listing {
            return Err(PlatformError::Api("namespace listing unavailable".to_string()));
        }
        Ok(self.namespaces.lock().iter().cloned().collect())
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<BatchJob>, PlatformError> {
        if self.faults.lock().failing_namespaces.contains(namespace) {
            return Err(PlatformError::Api(format!(
                "job listing unavailable in namespace {namespace}"
            )));
        }
        Ok(sorted_values(&self.jobs)
            .into_iter()
            .filter(|job| job.metadata.namespace == namespace)
            .collect())
    }

    async fn list_jobs_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<BatchJob>, PlatformError> {
        Ok(sorted_values(&self.jobs)
            .into_iter()
            .filter(|job| job.metadata.matches_labels(labels))
            .collect())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<BatchJob, PlatformError> {
        self.job(namespace, name)
            .ok_or_else(|| PlatformError::not_found(kind::JOB, namespace, name))
    }

    async fn create_job(&self, mut job: BatchJob) -> Result<BatchJob, PlatformError> {
        {
            let mut faults = self.faults.lock();
            if faults.failing_job_creates > 0 {
                faults.failing_job_creates -= 1;
                return Err(PlatformError::Api("job creation rejected".to_string()));
            }
        }
        let key = job.metadata.key();
        if self.jobs.contains_key(&key) {
            return Err(PlatformError::AlreadyExists {
                kind: kind::JOB,
                namespace: key.namespace,
                name: key.name,
            });
        }
        job.metadata.uid = String::new();
        job.metadata.creation_timestamp = None;
        self.stamp(&mut job.metadata);
        self.jobs.insert(key, job.clone());
        Ok(job)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.drop_job(&JobKey::new(namespace, name))
            .map(|_| ())
            .ok_or_else(|| PlatformError::not_found(kind::JOB, namespace, name))
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>, PlatformError> {
        Ok(sorted_values(&self.pods)
            .into_iter()
            .filter(|pod| {
                pod.metadata.namespace == namespace
                    && pod.metadata.labels.get(JOB_NAME_LABEL).map(String::as_str) == Some(job_name)
            })
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod_name: &str) -> Result<String, PlatformError> {
        let key = JobKey::new(namespace, pod_name);
        if !self.pods.contains_key(&key) {
            return Err(PlatformError::not_found(kind::POD, namespace, pod_name));
        }
        Ok(self.logs.get(&key).map(|l| l.value().clone()).unwrap_or_default())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, PlatformError> {
        self.secrets
            .get(&JobKey::new(namespace, name))
            .map(|s| s.value().clone())
            .ok_or_else(|| PlatformError::not_found(kind::SECRET, namespace, name))
    }

    async fn list_secrets_by_labels(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, PlatformError> {
        Ok(sorted_values(&self.secrets)
            .into_iter()
            .filter(|s| s.metadata.namespace == namespace && s.metadata.matches_labels(labels))
            .collect())
    }

    async fn get_monitor(&self, namespace: &str, name: &str) -> Result<Monitor, PlatformError> {
        self.monitor(namespace, name)
            .ok_or_else(|| PlatformError::not_found(kind::MONITOR, namespace, name))
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>, PlatformError> {
        Ok(sorted_values(&self.monitors))
    }

    async fn update_monitor(&self, monitor: &Monitor) -> Result<Monitor, PlatformError> {
        self.update_object(&self.monitors, monitor, |stored, incoming| {
            merge_metadata(&mut stored.metadata, &incoming.metadata);
            if stored.spec != incoming.spec {
                stored.spec = incoming.spec.clone();
                stored.metadata.generation += 1;
            }
        })
    }

    async fn update_monitor_status(&self, monitor: &Monitor) -> Result<Monitor, PlatformError> {
        self.take_status_conflict(monitor)?;
        self.update_object(&self.monitors, monitor, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
    }

    async fn get_unlock_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<UnlockRequest, PlatformError> {
        self.unlock_request(namespace, name)
            .ok_or_else(|| PlatformError::not_found(kind::UNLOCK_REQUEST, namespace, name))
    }

    async fn list_unlock_requests(&self) -> Result<Vec<UnlockRequest>, PlatformError> {
        Ok(sorted_values(&self.unlock_requests))
    }

    async fn update_unlock_request(
        &self,
        request: &UnlockRequest,
    ) -> Result<UnlockRequest, PlatformError> {
        self.update_object(&self.unlock_requests, request, |stored, incoming| {
            merge_metadata(&mut stored.metadata, &incoming.metadata);
            if stored.spec != incoming.spec {
                stored.spec = incoming.spec.clone();
                stored.metadata.generation += 1;
            }
        })
    }

    async fn update_unlock_request_status(
        &self,
        request: &UnlockRequest,
    ) -> Result<UnlockRequest, PlatformError> {
        self.take_status_conflict(request)?;
        self.update_object(&self.unlock_requests, request, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
    }
}
