//! Polling scheduler tests

use chrono::{Duration, Utc};
use shipyard::models::deployment::TriggerKind;
use shipyard::workers::scheduler::TickReport;

use crate::common::{templated, Harness};

#[tokio::test]
async fn test_interval_gates_checks() {
    let h = Harness::new();
    h.add_project("alice", "blog", templated());
    let config = h.app.autodeploy.enable_polling("alice", "blog", "main", 10).unwrap();

    let checked_at = Utc::now();
    h.app.autodeploy.mark_checked(config.id, checked_at).unwrap();

    let report = h.app.scheduler.tick(checked_at + Duration::minutes(5)).await.unwrap();
    assert_eq!(report.not_due, 1);
    assert_eq!(report.checked, 0);
    assert_eq!(h.git.fetches(), 0);

    let report = h.app.scheduler.tick(checked_at + Duration::minutes(10)).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.deployed, 0);
    assert_eq!(h.git.fetches(), 1);

    let config = h.app.autodeploy.get("alice", "blog").unwrap().unwrap();
    assert_eq!(
        config.last_check.map(|at| at.timestamp()),
        Some((checked_at + Duration::minutes(10)).timestamp())
    );
}

#[tokio::test]
async fn test_upstream_change_deploys() {
    let h = Harness::new();
    h.add_project("alice", "blog", templated());
    h.app.autodeploy.enable_polling("alice", "blog", "main", 5).unwrap();
    h.git.push_upstream("abc1234");

    let report = h.app.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(
        report,
        TickReport {
            checked: 1,
            deployed: 1,
            ..Default::default()
        }
    );

    let history = h.app.logs.recent("alice", "blog", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trigger, TriggerKind::Auto);
    assert_eq!(h.runtime.restarts().len(), 1);
}

#[tokio::test]
async fn test_missing_project_dir_disables_polling() {
    let h = Harness::new();
    h.add_project("alice", "blog", templated());
    h.add_project("bob", "shop", templated());
    h.app.autodeploy.enable_polling("alice", "blog", "main", 5).unwrap();
    h.app.autodeploy.enable_polling("bob", "shop", "main", 5).unwrap();
    std::fs::remove_dir_all(h.app.layout.project_dir("alice", "blog").path()).unwrap();

    let report = h.app.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.disabled, 1);
    assert_eq!(report.checked, 1);

    let config = h.app.autodeploy.get("alice", "blog").unwrap().unwrap();
    assert!(!config.enabled);
    let polling = h.app.autodeploy.list_polling_enabled().unwrap();
    assert_eq!(polling.len(), 1);
    assert_eq!(polling[0].owner, "bob");
}

#[tokio::test]
async fn test_failing_project_does_not_stop_tick() {
    let h = Harness::new();
    h.add_project("alice", "blog", templated());
    h.add_project("bob", "shop", templated());
    h.app.autodeploy.enable_polling("alice", "blog", "main", 5).unwrap();
    h.app.autodeploy.enable_polling("bob", "shop", "main", 5).unwrap();
    h.git.push_upstream("abc1234");
    h.git.fail_pulls("remote hung up");

    let report = h.app.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.checked, 0);
    assert_eq!(h.git.pulls(), 2);

    // Both rows were marked as checked despite the failures
    for config in h.app.autodeploy.list_polling_enabled().unwrap() {
        assert!(config.last_check.is_some());
    }
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new();
    let scheduler = h.app.scheduler.clone();
    scheduler
        .run(
            |_| tokio::time::sleep(std::time::Duration::from_millis(1)),
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }),
        )
        .await;
}
