use lockwarden_core::types::{BatchJob, JobSelector, JobStatus, MonitorPhase, MonitorSpec};
use lockwarden_core::{EngineConfig, EngineError, InMemoryCluster, ManualClock, MonitorEngine, ReconcileOutcome};
use lockwarden_test_utils::{
    failed_job, fixed_clock, monitor, pod_for, secret, seeded_cluster, RecordingMetrics, LOCKED, MONITOR,
    NAMESPACE,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const MONITOR_LABEL: &str = "lockwarden.dev/monitor";

fn engine(cluster: &Arc<InMemoryCluster>, clock: &Arc<ManualClock>, metrics: &Arc<RecordingMetrics>) -> MonitorEngine {
    MonitorEngine::new(cluster.clone(), EngineConfig::default())
        .with_clock(clock.clone())
        .with_metrics(metrics.clone())
}

fn remediation_jobs(cluster: &InMemoryCluster) -> Vec<BatchJob> {
    cluster
        .jobs()
        .into_iter()
        .filter(|job| job.metadata.labels.contains_key(MONITOR_LABEL))
        .collect()
}

fn set_spec(cluster: &InMemoryCluster, spec: MonitorSpec) {
    let mut current = cluster.monitor(NAMESPACE, MONITOR).unwrap();
    current.spec = spec;
    cluster.insert_monitor(current);
}

#[tokio::test]
async fn replayed_passes_create_one_job() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let metrics = RecordingMetrics::new();
    let engine = engine(&cluster, &clock, &metrics);

    let first = engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    clock.advance(chrono::Duration::seconds(30));
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    assert_eq!(first.requeue_after(), Some(Duration::from_secs(30)));
    assert_eq!(remediation_jobs(&cluster).len(), 1);

    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.phase, Some(MonitorPhase::Active));
    assert_eq!(status.total_unlocks_created, 1);
    assert_eq!(status.total_lock_errors_detected, 1);
    assert_eq!(status.processed_jobs.len(), 1);
    assert_eq!(status.active_unlocks.len(), 1);
    assert_eq!(status.last_error, None);

    let recorded = metrics.snapshot();
    assert_eq!(recorded.created, 1);
    assert_eq!(recorded.active, 1);
    assert_eq!(recorded.reconciliations, vec![ReconcileOutcome::Success; 2]);
}

#[tokio::test]
async fn prowlarr_job_yields_app_and_object() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    engine(&cluster, &clock, &RecordingMetrics::new())
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    let jobs = remediation_jobs(&cluster);
    let job = &jobs[0];
    assert!(job.name().starts_with("volsync-unlock-prowlarr-prowlarr-nfs-"));
    assert_eq!(job.metadata.labels["lockwarden.dev/app"], "prowlarr");
    assert_eq!(job.metadata.labels["lockwarden.dev/object"], "prowlarr-nfs");
    assert_eq!(
        job.metadata.annotations["lockwarden.dev/failed-job"],
        "media/volsync-src-prowlarr-nfs"
    );

    let active = &cluster.monitor(NAMESPACE, MONITOR).unwrap().status.active_unlocks[0];
    assert_eq!(active.app_name, "prowlarr");
    assert_eq!(active.object_name, "prowlarr-nfs");
    assert_eq!(active.alert_fingerprint.len(), 16);
}

#[tokio::test]
async fn ceiling_defers_excess_candidates() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    for app in ["radarr", "sonarr"] {
        let job = cluster.insert_job(failed_job(NAMESPACE, &format!("volsync-src-{app}"), LOCKED));
        cluster.insert_pod(pod_for(&job, LOCKED));
        cluster.insert_secret(secret(NAMESPACE, &format!("{app}-repo-secret")));
    }
    set_spec(
        &cluster,
        MonitorSpec {
            max_concurrent_unlocks: 2,
            ..MonitorSpec::default()
        },
    );
    let engine = engine(&cluster, &clock, &RecordingMetrics::new());

    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(remediation_jobs(&cluster).len(), 2);
    assert_eq!(status.active_unlocks.len(), 2);
    assert_eq!(status.processed_jobs.len(), 2);
    assert_eq!(status.total_lock_errors_detected, 2);

    // ceiling still reached: nothing new
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    assert_eq!(remediation_jobs(&cluster).len(), 2);
    let denied = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(denied.processed_jobs, status.processed_jobs);
    assert_eq!(denied.active_unlocks, status.active_unlocks);
    assert_eq!(denied.total_lock_errors_detected, 2);

    let finished = &remediation_jobs(&cluster)[0];
    cluster.set_job_status(
        finished.namespace(),
        finished.name(),
        JobStatus {
            succeeded: 1,
            ..JobStatus::default()
        },
    );
    clock.advance(chrono::Duration::seconds(30));
    // the first pass frees the slot, the second fills it
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(remediation_jobs(&cluster).len(), 3);
    assert_eq!(status.processed_jobs.len(), 3);
    assert_eq!(status.total_unlocks_succeeded, 1);
    assert_eq!(status.active_unlocks.len(), 2);
}

#[tokio::test]
async fn long_objects_sharing_a_prefix_get_their_own_jobs() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    for object in ["nextcloud-postgres-primary-data", "nextcloud-postgres-primary-config"] {
        let job = cluster.insert_job(failed_job(NAMESPACE, &format!("volsync-src-{object}"), LOCKED));
        cluster.insert_pod(pod_for(&job, LOCKED));
    }
    cluster.insert_secret(secret(NAMESPACE, "nextcloud-postgres-primary-repo-secret"));
    engine(&cluster, &clock, &RecordingMetrics::new())
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    let jobs = remediation_jobs(&cluster);
    assert_eq!(jobs.len(), 3);
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.total_unlocks_created, 3);
    assert_eq!(status.active_unlocks.len(), 3);

    let mut unlock_jobs: Vec<_> = status.processed_jobs.iter().map(|p| p.unlock_job_name.clone()).collect();
    unlock_jobs.sort();
    unlock_jobs.dedup();
    assert_eq!(unlock_jobs.len(), 3);
    for job in &jobs {
        assert!(job.name().len() <= 63);
        let failed = &job.metadata.annotations["lockwarden.dev/failed-job"];
        assert!(status
            .processed_jobs
            .iter()
            .any(|p| &format!("{}/{}", p.namespace, p.job_name) == failed && p.unlock_job_name == job.name()));
    }
}

#[tokio::test]
async fn evicted_entries_are_not_counted_again() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let job = cluster.insert_job(failed_job(NAMESPACE, "volsync-src-radarr", LOCKED));
    cluster.insert_pod(pod_for(&job, LOCKED));
    cluster.insert_secret(secret(NAMESPACE, "radarr-repo-secret"));
    let metrics = RecordingMetrics::new();
    let engine = MonitorEngine::new(cluster.clone(), EngineConfig::default().with_ledger_cap(1))
        .with_clock(clock.clone())
        .with_metrics(metrics.clone());

    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.processed_jobs.len(), 1);
    assert_eq!(status.active_unlocks.len(), 2);

    // evicted failure whose job is still running and tracked
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.total_unlocks_created, 2);
    assert_eq!(status.active_unlocks.len(), 2);

    for job in remediation_jobs(&cluster) {
        cluster.set_job_status(
            job.namespace(),
            job.name(),
            JobStatus {
                succeeded: 1,
                ..JobStatus::default()
            },
        );
    }
    for _ in 0..5 {
        clock.advance(chrono::Duration::seconds(30));
        engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    }

    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(remediation_jobs(&cluster).len(), 2);
    assert_eq!(status.total_unlocks_created, 2);
    assert_eq!(status.total_lock_errors_detected, 2);
    assert_eq!(status.total_unlocks_succeeded, 2);
    assert!(status.active_unlocks.is_empty());
    assert_eq!(status.processed_jobs.len(), 1);

    let recorded = metrics.snapshot();
    assert_eq!(recorded.created, 2);
    assert_eq!(recorded.succeeded, 2);
    assert_eq!(recorded.active, 0);
    assert_eq!(recorded.lock_errors.values().sum::<u64>(), 2);
}

#[tokio::test]
async fn disabled_monitor_is_paused_without_scanning() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    set_spec(
        &cluster,
        MonitorSpec {
            enabled: false,
            ..MonitorSpec::default()
        },
    );
    let metrics = RecordingMetrics::new();

    let action = engine(&cluster, &clock, &metrics)
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    assert_eq!(action.requeue_after(), Some(Duration::from_secs(300)));
    assert!(remediation_jobs(&cluster).is_empty());
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.phase, Some(MonitorPhase::Paused));
    assert!(status.processed_jobs.is_empty());
    assert_eq!(metrics.snapshot().reconciliations, vec![ReconcileOutcome::Paused]);
}

#[tokio::test]
async fn succeeded_remediation_is_counted_once() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let metrics = RecordingMetrics::new();
    let engine = engine(&cluster, &clock, &metrics);
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    let job = &remediation_jobs(&cluster)[0];
    cluster.set_job_status(
        job.namespace(),
        job.name(),
        JobStatus {
            succeeded: 1,
            ..JobStatus::default()
        },
    );
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert!(status.active_unlocks.is_empty());
    assert_eq!(status.total_unlocks_succeeded, 1);
    assert_eq!(status.total_unlocks_failed, 0);
    // the failure stays ledgered: no second remediation
    assert_eq!(status.total_unlocks_created, 1);

    let recorded = metrics.snapshot();
    assert_eq!(recorded.succeeded, 1);
    assert_eq!(recorded.active, 0);
}

#[tokio::test]
async fn vanished_remediation_counts_as_failed() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let engine = engine(&cluster, &clock, &RecordingMetrics::new());
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    let job = &remediation_jobs(&cluster)[0];
    cluster.remove_job(job.namespace(), job.name());
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert!(status.active_unlocks.is_empty());
    assert_eq!(status.total_unlocks_failed, 1);
}

#[tokio::test]
async fn scan_failure_marks_monitor_errored() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    cluster.fail_namespace_listing(true);
    let metrics = RecordingMetrics::new();

    let action = engine(&cluster, &clock, &metrics)
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    assert_eq!(action.requeue_after(), Some(Duration::from_secs(30)));
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.phase, Some(MonitorPhase::Error));
    assert!(status.last_error.unwrap().contains("namespace"));
    assert!(status.processed_jobs.is_empty());
    assert!(remediation_jobs(&cluster).is_empty());
    assert_eq!(metrics.snapshot().reconciliations, vec![ReconcileOutcome::Error]);
}

#[tokio::test]
async fn one_unlistable_namespace_aborts_the_scan() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    cluster.add_namespace("downloads");
    cluster.fail_job_listing_in("downloads", true);

    engine(&cluster, &clock, &RecordingMetrics::new())
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.phase, Some(MonitorPhase::Error));
    assert!(remediation_jobs(&cluster).is_empty());
}

#[tokio::test]
async fn explicit_namespaces_limit_the_scan() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    cluster.add_namespace("downloads");
    cluster.fail_job_listing_in("downloads", true);
    set_spec(
        &cluster,
        MonitorSpec {
            job_selector: Some(JobSelector {
                namespaces: [NAMESPACE.to_string()].into(),
                ..JobSelector::default()
            }),
            ..MonitorSpec::default()
        },
    );

    engine(&cluster, &clock, &RecordingMetrics::new())
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    assert_eq!(remediation_jobs(&cluster).len(), 1);
}

#[tokio::test]
async fn conflicting_writes_are_retried_without_duplicates() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    cluster.conflict_next_status_updates(2);
    let metrics = RecordingMetrics::new();

    engine(&cluster, &clock, &metrics)
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    assert_eq!(remediation_jobs(&cluster).len(), 1);
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.total_unlocks_created, 1);
    assert_eq!(status.active_unlocks.len(), 1);
    assert_eq!(metrics.snapshot().created, 1);
}

#[tokio::test]
async fn persistent_conflicts_are_surfaced() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    cluster.conflict_next_status_updates(10);

    let err = engine(&cluster, &clock, &RecordingMetrics::new())
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::ConflictRetriesExhausted { attempts: 4 });
    assert!(err.is_retryable());
    assert_eq!(remediation_jobs(&cluster).len(), 1);
}

#[tokio::test]
async fn lost_status_write_adopts_existing_job() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let engine = engine(&cluster, &clock, &RecordingMetrics::new());
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    // the status is rolled back as if the write had been lost
    let mut rolled_back = cluster.monitor(NAMESPACE, MONITOR).unwrap();
    rolled_back.status = Default::default();
    cluster.insert_monitor(rolled_back);
    clock.advance(chrono::Duration::seconds(60));
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    assert_eq!(remediation_jobs(&cluster).len(), 1);
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.processed_jobs.len(), 1);
    assert_eq!(status.active_unlocks.len(), 1);
}

#[tokio::test]
async fn name_clash_with_another_failure_is_not_adopted() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let engine = engine(&cluster, &clock, &RecordingMetrics::new());
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    // same name, but created for a different failure
    let mut clashing = remediation_jobs(&cluster).remove(0);
    clashing
        .metadata
        .annotations
        .insert("lockwarden.dev/failed-job".to_string(), "media/volsync-src-other".to_string());
    cluster.insert_job(clashing);
    let mut rolled_back = cluster.monitor(NAMESPACE, MONITOR).unwrap();
    rolled_back.status = Default::default();
    cluster.insert_monitor(rolled_back);

    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();

    assert_eq!(remediation_jobs(&cluster).len(), 1);
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert!(status.processed_jobs.is_empty());
    assert_eq!(status.total_unlocks_created, 0);
    assert_eq!(status.total_lock_errors_detected, 0);
    assert_eq!(status.phase, Some(MonitorPhase::Active));
    assert!(status.last_error.unwrap().contains("already exists"));
}

#[tokio::test]
async fn failed_job_is_removed_when_requested() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    set_spec(
        &cluster,
        MonitorSpec {
            remove_failed_jobs: true,
            ..MonitorSpec::default()
        },
    );

    engine(&cluster, &clock, &RecordingMetrics::new())
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    assert!(cluster.job(NAMESPACE, "volsync-src-prowlarr-nfs").is_none());
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert!(status.processed_jobs[0].removed);
    assert_eq!(status.total_failed_jobs_removed, 1);
}

#[tokio::test]
async fn missing_credentials_leave_candidate_for_next_pass() {
    let clock = fixed_clock();
    let cluster = Arc::new(InMemoryCluster::with_clock(clock.clone()));
    let job = cluster.insert_job(failed_job(NAMESPACE, "volsync-src-prowlarr-nfs", LOCKED));
    cluster.insert_pod(pod_for(&job, LOCKED));
    cluster.insert_monitor(monitor(NAMESPACE, MONITOR));
    let engine = engine(&cluster, &clock, &RecordingMetrics::new());

    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.phase, Some(MonitorPhase::Active));
    assert!(status.processed_jobs.is_empty());
    assert!(status.last_error.unwrap().contains("no repository secret"));

    cluster.insert_secret(secret(NAMESPACE, "prowlarr-backup"));
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    let status = cluster.monitor(NAMESPACE, MONITOR).unwrap().status;
    assert_eq!(status.processed_jobs.len(), 1);
    assert_eq!(status.last_error, None);
    assert_eq!(remediation_jobs(&cluster).len(), 1);
}

#[tokio::test]
async fn unrelated_failures_are_ignored() {
    let clock = fixed_clock();
    let cluster = Arc::new(InMemoryCluster::with_clock(clock.clone()));
    cluster.insert_job(failed_job(NAMESPACE, "volsync-src-radarr", "dial tcp 10.0.0.4:443: connection refused"));
    cluster.insert_secret(secret(NAMESPACE, "radarr-repo-secret"));
    cluster.insert_monitor(monitor(NAMESPACE, MONITOR));
    let metrics = RecordingMetrics::new();

    engine(&cluster, &clock, &metrics)
        .reconcile(NAMESPACE, MONITOR)
        .await
        .unwrap();

    assert!(remediation_jobs(&cluster).is_empty());
    assert!(metrics.snapshot().lock_errors.is_empty());
}

#[tokio::test]
async fn deleting_monitor_removes_its_jobs() {
    let clock = fixed_clock();
    let cluster = seeded_cluster(clock.clone());
    let engine = engine(&cluster, &clock, &RecordingMetrics::new());
    engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    assert_eq!(remediation_jobs(&cluster).len(), 1);

    cluster.delete_monitor(NAMESPACE, MONITOR).unwrap();
    assert!(cluster.monitor(NAMESPACE, MONITOR).unwrap().metadata.is_deleting());

    let action = engine.reconcile(NAMESPACE, MONITOR).await.unwrap();
    assert_eq!(action.requeue_after(), None);
    assert!(remediation_jobs(&cluster).is_empty());
    assert!(cluster.monitor(NAMESPACE, MONITOR).is_none());
    // the failed backup job is not the monitor's to delete
    assert!(cluster.job(NAMESPACE, "volsync-src-prowlarr-nfs").is_some());
}
