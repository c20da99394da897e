//! Testing utilities for the Lockwarden workspace
//!
//! Shared fixtures, a seeded in-memory cluster and a recording metrics sink.

use chrono::{TimeZone, Utc};
use lockwarden_core::metrics::{MetricsRecorder, ReconcileOutcome, UnlockTags};
use lockwarden_core::platform::{InMemoryCluster, JOB_NAME_LABEL};
use lockwarden_core::types::{
    BatchJob, Container, ContainerStatus, JobCondition, JobConditionType, JobStatus, Monitor,
    ObjectMeta, Pod, PodPhase, Secret, UnlockRequest, UnlockRequestSpec, Volume, VolumeMount, VolumeSource,
};
use lockwarden_core::ManualClock;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const NAMESPACE: &str = "media";
pub const MONITOR: &str = "volsync-monitor";
pub const LOCKED: &str =
    "Fatal: unable to create lock in backend: repository is already locked exclusively by PID 812";

/// Clock pinned to a fixed instant
pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap()))
}

/// Backup job that failed with `message` as its condition message
pub fn failed_job(namespace: &str, name: &str, message: &str) -> BatchJob {
    let mut job = BatchJob::new(namespace, name);
    job.status = JobStatus {
        failed: 1,
        conditions: vec![JobCondition::new(JobConditionType::Failed, message)],
        ..JobStatus::default()
    };
    job.spec.template.spec.containers.push(Container {
        name: "restic".to_string(),
        image: "quay.io/backube/volsync:0.9.1".to_string(),
        volume_mounts: vec![VolumeMount {
            name: "repository".to_string(),
            mount_path: "/repository".to_string(),
            ..VolumeMount::default()
        }],
        ..Container::default()
    });
    job.spec.template.spec.volumes.push(Volume {
        name: "repository".to_string(),
        source: VolumeSource::Nfs {
            server: "nas.local".to_string(),
            path: "/volume1/backups".to_string(),
            read_only: false,
        },
    });
    job
}

/// Backup job that is still running
pub fn running_job(namespace: &str, name: &str) -> BatchJob {
    let mut job = BatchJob::new(namespace, name);
    job.status.active = 1;
    job
}

/// Failed pod of `job` with one terminated container
pub fn pod_for(job: &BatchJob, terminated_message: &str) -> Pod {
    Pod {
        metadata: ObjectMeta::new(job.namespace(), format!("{}-x7k2p", job.name()))
            .with_label(JOB_NAME_LABEL, job.name()),
        phase: PodPhase::Failed,
        container_statuses: vec![ContainerStatus {
            name: "restic".to_string(),
            exit_code: Some(1),
            terminated_message: Some(terminated_message.to_string()),
        }],
    }
}

pub fn secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta::new(namespace, name),
        keys: BTreeSet::from(["RESTIC_PASSWORD".to_string(), "RESTIC_REPOSITORY".to_string()]),
    }
}

pub fn monitor(namespace: &str, name: &str) -> Monitor {
    Monitor::new(namespace, name)
}

pub fn unlock_request(namespace: &str, name: &str, app: &str, target_namespace: &str) -> UnlockRequest {
    UnlockRequest::new(
        namespace,
        name,
        UnlockRequestSpec {
            app_name: app.to_string(),
            namespace: target_namespace.to_string(),
            object_name: app.to_string(),
            ..UnlockRequestSpec::default()
        },
    )
}

/// Cluster with one monitor, one lock-failed job and its credentials
pub fn seeded_cluster(clock: Arc<ManualClock>) -> Arc<InMemoryCluster> {
    let cluster = Arc::new(InMemoryCluster::with_clock(clock));
    let job = cluster.insert_job(failed_job(NAMESPACE, "volsync-src-prowlarr-nfs", LOCKED));
    cluster.insert_pod(pod_for(&job, LOCKED));
    cluster.insert_secret(secret(NAMESPACE, "prowlarr-repo-secret"));
    cluster.insert_monitor(monitor(NAMESPACE, MONITOR));
    cluster
}

/// Per-event counters kept by [`RecordingMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedMetrics {
    pub created: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub active: i64,
    pub lock_errors: BTreeMap<String, u64>,
    pub reconciliations: Vec<ReconcileOutcome>,
}

/// Metrics sink that keeps every event for assertions
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    inner: Mutex<RecordedMetrics>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> RecordedMetrics {
        self.inner.lock().clone()
    }
}

impl MetricsRecorder for RecordingMetrics {
    fn unlock_created(&self, _tags: &UnlockTags) {
        self.inner.lock().created += 1;
    }

    fn unlock_succeeded(&self, _tags: &UnlockTags) {
        self.inner.lock().succeeded += 1;
    }

    fn unlock_failed(&self, _tags: &UnlockTags) {
        self.inner.lock().failed += 1;
    }

    fn active_unlocks_changed(&self, _tags: &UnlockTags, delta: i64) {
        self.inner.lock().active += delta;
    }

    fn lock_error_detected(&self, _tags: &UnlockTags, pattern: &str) {
        *self.inner.lock().lock_errors.entry(pattern.to_string()).or_default() += 1;
    }

    fn reconciliation(&self, _namespace: &str, _monitor: &str, outcome: ReconcileOutcome) {
        self.inner.lock().reconciliations.push(outcome);
    }
}
