//! Orchestration platform seam
//!
//! The engine consumes the platform only through [`ClusterApi`]:
//! - Namespace, job, pod and secret enumeration
//! - Job creation and deletion
//! - Monitor and unlock request reads, metadata updates and status writes
//!
//! Writes carry the object's `resourceVersion`; a stale version fails with
//! [`PlatformError::Conflict`].

pub mod memory;

pub use memory::{ClusterSnapshot, InMemoryCluster, SnapshotPod};

use crate::error::PlatformError;
use crate::types::{BatchJob, Monitor, Pod, Secret, UnlockRequest};
use std::collections::BTreeMap;

/// Label linking a pod to the job that created it
pub const JOB_NAME_LABEL: &str = "job-name";

/// Object kinds, as reported in errors
pub mod kind {
    pub const JOB: &str = "Job";
    pub const POD: &str = "Pod";
    pub const SECRET: &str = "Secret";
    pub const MONITOR: &str = "Monitor";
    pub const UNLOCK_REQUEST: &str = "UnlockRequest";
}

/// Platform operations consumed by the engine
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Every namespace visible to the engine
    async fn list_namespaces(&self) -> Result<Vec<String>, PlatformError>;

    /// Jobs in one namespace
    async fn list_jobs(&self, namespace: &str) -> Result<Vec<BatchJob>, PlatformError>;

    /// Jobs in any namespace carrying every label in `labels`
    async fn list_jobs_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<BatchJob>, PlatformError>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<BatchJob, PlatformError>;

    /// Create a job; fails with `AlreadyExists` on a name clash
    async fn create_job(&self, job: BatchJob) -> Result<BatchJob, PlatformError>;

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;

    /// Pods created by a job
    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>, PlatformError>;

    /// Already-fetched log text of a pod
    async fn pod_logs(&self, namespace: &str, pod_name: &str) -> Result<String, PlatformError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, PlatformError>;

    async fn list_secrets_by_labels(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, PlatformError>;

    async fn get_monitor(&self, namespace: &str, name: &str) -> Result<Monitor, PlatformError>;

    async fn list_monitors(&self) -> Result<Vec<Monitor>, PlatformError>;

    /// Write metadata and spec
    async fn update_monitor(&self, monitor: &Monitor) -> Result<Monitor, PlatformError>;

    /// Write the status sub-resource only
    async fn update_monitor_status(&self, monitor: &Monitor) -> Result<Monitor, PlatformError>;

    async fn get_unlock_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<UnlockRequest, PlatformError>;

    async fn list_unlock_requests(&self) -> Result<Vec<UnlockRequest>, PlatformError>;

    /// Write metadata and spec
    async fn update_unlock_request(
        &self,
        request: &UnlockRequest,
    ) -> Result<UnlockRequest, PlatformError>;

    /// Write the status sub-resource only
    async fn update_unlock_request_status(
        &self,
        request: &UnlockRequest,
    ) -> Result<UnlockRequest, PlatformError>;
}
