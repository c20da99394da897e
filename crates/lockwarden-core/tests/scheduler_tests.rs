use lockwarden_core::types::MonitorSpec;
use lockwarden_core::{EngineConfig, MonitorEngine, ReconcileScheduler, RunReport, UnlockRequestReconciler};
use lockwarden_test_utils::{fixed_clock, secret, seeded_cluster, unlock_request, MONITOR, NAMESPACE};
use std::sync::Arc;
use std::time::Duration;

fn scheduler(cluster: &Arc<lockwarden_core::InMemoryCluster>) -> ReconcileScheduler {
    let config = EngineConfig::default();
    let engine = Arc::new(MonitorEngine::new(cluster.clone(), config.clone()));
    let unlocks = Arc::new(UnlockRequestReconciler::new(cluster.clone(), config));
    ReconcileScheduler::new(cluster.clone(), engine, unlocks)
}

#[tokio::test(start_paused = true)]
async fn objects_run_again_once_due() {
    let cluster = seeded_cluster(fixed_clock());
    cluster.insert_secret(secret(NAMESPACE, "radarr-repo-secret"));
    cluster.insert_unlock_request(unlock_request("ops", "unlock-radarr", "radarr", NAMESPACE));
    let scheduler = scheduler(&cluster);

    let first = scheduler.run_pass().await.unwrap();
    assert_eq!(first, RunReport { reconciled: 2, failed: 0 });
    assert_eq!(scheduler.tracked(), 2);

    let idle = scheduler.run_due().await.unwrap();
    assert_eq!(idle.reconciled, 0);

    tokio::time::advance(Duration::from_secs(31)).await;
    let again = scheduler.run_due().await.unwrap();
    assert_eq!(again.reconciled, 2);
}

#[tokio::test(start_paused = true)]
async fn spec_changes_make_a_monitor_due() {
    let cluster = seeded_cluster(fixed_clock());
    let scheduler = scheduler(&cluster);
    scheduler.run_pass().await.unwrap();

    let mut monitor = cluster.monitor(NAMESPACE, MONITOR).unwrap();
    monitor.metadata.generation += 1;
    monitor.spec = MonitorSpec {
        force_unlock: true,
        ..MonitorSpec::default()
    };
    cluster.insert_monitor(monitor);

    let report = scheduler.run_due().await.unwrap();
    assert_eq!(report.reconciled, 1);
}

#[tokio::test(start_paused = true)]
async fn removed_objects_are_forgotten() {
    let cluster = seeded_cluster(fixed_clock());
    let scheduler = scheduler(&cluster);
    scheduler.run_pass().await.unwrap();
    assert_eq!(scheduler.tracked(), 1);

    cluster.delete_monitor(NAMESPACE, MONITOR).unwrap();
    scheduler.run_due().await.unwrap();
    scheduler.run_pass().await.unwrap();
    assert_eq!(scheduler.tracked(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_until_stops_on_shutdown() {
    let cluster = seeded_cluster(fixed_clock());
    let scheduler = scheduler(&cluster);
    scheduler
        .run_until(tokio::time::sleep(Duration::from_secs(5)))
        .await;
    assert_eq!(scheduler.tracked(), 1);
}
