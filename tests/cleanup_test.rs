mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use common::{Factory, TestApp};
use dockyard::error::AppError;
use dockyard::models::{
    Conclusion, ContainerStatus, Deployment, DeploymentStatus, DomainKind, DomainStatus,
    FailureKind, ProjectStatus, StatusTransition, Trigger,
};
use dockyard::queue::{JobKind, JobStatus};
use dockyard::repositories::{
    AliasRepository, DeploymentRepository, DomainRepository, ProjectRepository,
};
use dockyard::runtime::{ContainerState, DEPLOYMENT_LABEL};
use dockyard::services::{CleanupService, DeploymentService, EventType};

/// Deploy `branch` and drive it to success
async fn deploy(app: &TestApp, factory: &Factory<'_>, project_id: Uuid, branch: &str, sha: &str) -> Deployment {
    // Keep creation order strict between deployments
    tokio::time::sleep(Duration::from_millis(5)).await;
    let deployment = factory.create_deployment(project_id, branch, sha).await;
    app.settle().await;
    let deployment = app.deployment(deployment.id).await;
    assert!(deployment.is_succeeded(), "deployment {} did not succeed", sha);
    deployment
}

#[tokio::test]
async fn test_finalize_retires_superseded_containers() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let first = deploy(&app, &factory, project.id, "main", "aaa111").await;
    let second = deploy(&app, &factory, project.id, "main", "bbb222").await;
    let third = deploy(&app, &factory, project.id, "main", "ccc333").await;

    // Current and previous stay for rollback, the rest goes
    assert_eq!(
        app.deployment(first.id).await.container_status,
        Some(ContainerStatus::Removed)
    );
    assert_eq!(app.runtime.state_of(first.id).await, None);
    assert_eq!(
        app.runtime.state_of(second.id).await,
        Some(ContainerState::Running)
    );
    assert_eq!(
        app.runtime.state_of(third.id).await,
        Some(ContainerState::Running)
    );
    assert_eq!(app.runtime.container_count().await, 2);
}

#[tokio::test]
async fn test_previous_is_retired_without_retention() {
    let app = TestApp::with_config(|c| c.retain_previous = false).await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let first = deploy(&app, &factory, project.id, "main", "aaa111").await;
    let second = deploy(&app, &factory, project.id, "main", "bbb222").await;

    assert_eq!(app.runtime.state_of(first.id).await, None);
    assert_eq!(
        app.runtime.state_of(second.id).await,
        Some(ContainerState::Running)
    );
}

#[tokio::test]
async fn test_cleanup_waits_for_drain_grace() {
    let app = TestApp::with_config(|c| {
        c.retain_previous = false;
        c.drain_grace = Duration::from_secs(3600);
    })
    .await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let first = deploy(&app, &factory, project.id, "main", "aaa111").await;
    deploy(&app, &factory, project.id, "main", "bbb222").await;

    // Cleanup jobs were scheduled behind the grace period
    assert!(!app.jobs_of("cleanup_project").await.is_empty());
    assert_eq!(
        CleanupService::cleanup_project(&app.state, project.id)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        app.runtime.state_of(first.id).await,
        Some(ContainerState::Running)
    );
}

#[tokio::test]
async fn test_sweep_removes_orphaned_containers() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let live = deploy(&app, &factory, project.id, "main", "aaa111").await;

    app.runtime.add_running("stray", BTreeMap::new()).await;
    app.runtime
        .add_running(
            "runner-unknown",
            BTreeMap::from([(DEPLOYMENT_LABEL.to_string(), Uuid::new_v4().to_string())]),
        )
        .await;
    // Second container claiming the live deployment
    app.runtime
        .add_running(
            "runner-duplicate",
            BTreeMap::from([(DEPLOYMENT_LABEL.to_string(), live.id.to_string())]),
        )
        .await;
    assert_eq!(app.runtime.container_count().await, 4);

    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.orphans_removed, 3);
    assert_eq!(report.routing_regenerated, 1);
    assert_eq!(app.runtime.container_count().await, 1);
    assert_eq!(
        app.runtime.state_of(live.id).await,
        Some(ContainerState::Running)
    );
}

#[tokio::test]
async fn test_idle_project_is_deactivated() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let domain = factory
        .create_domain(project.id, "shop.example.com", "prod", DomainKind::Route)
        .await;
    let live = deploy(&app, &factory, project.id, "main", "aaa111").await;
    assert!(app.routing_file(project.id).await.is_some());

    let idle_since = OffsetDateTime::now_utc() - time::Duration::days(10);
    app.store.record_traffic(project.id, idle_since).await.unwrap();

    // Swept through the job queue like the monitor does
    app.enqueue(JobKind::CleanupSweep).await;
    app.drain().await;

    let project_row = app.store.find_project(project.id).await.unwrap().unwrap();
    assert_eq!(project_row.status, ProjectStatus::Inactive);
    assert!(project_row.deactivated_at.is_some());

    let domains = app.store.list_domains_by_project(project.id).await.unwrap();
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].id, domain.id);
    assert_eq!(domains[0].status, DomainStatus::Disabled);

    // Stopped, not removed, so reactivation can reuse the aliases
    assert_eq!(
        app.deployment(live.id).await.container_status,
        Some(ContainerStatus::Stopped)
    );
    assert_eq!(
        app.runtime.state_of(live.id).await,
        Some(ContainerState::Exited { code: 0 })
    );
    assert!(app.routing_file(project.id).await.is_none());
    assert_eq!(
        app.publisher
            .events_of(EventType::ProjectDeactivated)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_reactivate_redeploys_environment_aliases() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    factory
        .create_domain(project.id, "shop.example.com", "prod", DomainKind::Route)
        .await;
    let production = deploy(&app, &factory, project.id, "main", "aaa111").await;
    let staging = deploy(&app, &factory, project.id, "develop", "bbb222").await;

    let idle_since = OffsetDateTime::now_utc() - time::Duration::days(10);
    app.store.record_traffic(project.id, idle_since).await.unwrap();
    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.deactivated, 1);

    let created = CleanupService::reactivate(&app.state, project.id)
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    for deployment in &created {
        assert_eq!(deployment.trigger, Trigger::Reactivation);
    }
    let mut shas: Vec<&str> = created.iter().map(|d| d.commit_sha.as_str()).collect();
    shas.sort();
    assert_eq!(shas, vec![production.commit_sha.as_str(), staging.commit_sha.as_str()]);

    let project_row = app.store.find_project(project.id).await.unwrap().unwrap();
    assert_eq!(project_row.status, ProjectStatus::Active);
    assert!(project_row.deactivated_at.is_none());
    let domains = app.store.list_domains_by_project(project.id).await.unwrap();
    assert_eq!(domains[0].status, DomainStatus::Active);

    // Already active: nothing more to do
    let again = CleanupService::reactivate(&app.state, project.id)
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(
        app.publisher
            .events_of(EventType::ProjectReactivated)
            .await
            .len(),
        1
    );

    app.settle().await;
    for deployment in created {
        assert!(app.deployment(deployment.id).await.is_succeeded());
    }
    assert!(app.routing_file(project.id).await.is_some());
}

#[tokio::test]
async fn test_reactivate_unknown_project() {
    let app = TestApp::new().await;

    let err = CleanupService::reactivate(&app.state, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_deleted_project_is_purged() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    factory
        .create_domain(project.id, "shop.example.com", "prod", DomainKind::Route)
        .await;
    let live = deploy(&app, &factory, project.id, "main", "aaa111").await;
    assert!(app.routing_file(project.id).await.is_some());

    app.store
        .set_project_status(project.id, ProjectStatus::Deleted)
        .await
        .unwrap();
    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.purged, 1);

    assert!(app.store.find_project(project.id).await.unwrap().is_none());
    assert!(app
        .store
        .list_aliases_by_project(project.id)
        .await
        .unwrap()
        .is_empty());
    assert!(app
        .store
        .list_domains_by_project(project.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(app.runtime.state_of(live.id).await, None);
    assert_eq!(app.runtime.container_count().await, 0);
    assert!(app.routing_file(project.id).await.is_none());
}

#[tokio::test]
async fn test_success_awaiting_its_swap_is_not_retired() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let first = deploy(&app, &factory, project.id, "main", "aaa111").await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = factory.create_deployment(project.id, "main", "bbb222").await;
    app.drain().await;
    // Concluded, then the worker died before moving any alias
    assert!(app
        .store
        .transition(
            second.id,
            &[DeploymentStatus::InProgress],
            StatusTransition::succeeded(),
        )
        .await
        .unwrap());

    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.retired, 0);
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(
        app.runtime.state_of(second.id).await,
        Some(ContainerState::Running)
    );

    // The redelivered finalize still has a live container to promote
    DeploymentService::finalize(&app.state, second.id)
        .await
        .unwrap();
    let alias = app.store.find_alias(&project.slug).await.unwrap().unwrap();
    assert_eq!(alias.deployment_id, second.id);
    assert_eq!(alias.previous_deployment_id, Some(first.id));
}

#[tokio::test]
async fn test_sweep_fails_deployment_whose_start_job_died() {
    let app = TestApp::with_config(|c| {
        c.job_max_attempts = 1;
        c.start_timeout = Duration::ZERO;
    })
    .await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "main", "abc123").await;

    // A worker takes the start job, creates the container and stalls
    let stalled = app
        .state
        .job_queue
        .dequeue(Duration::ZERO)
        .await
        .unwrap()
        .expect("start job should be queued");
    assert_eq!(stalled.kind.as_str(), "deploy_start");
    app.runtime
        .add_running(
            &deployment.container_name(),
            BTreeMap::from([(DEPLOYMENT_LABEL.to_string(), deployment.id.to_string())]),
        )
        .await;

    let recovered = app
        .state
        .job_queue
        .recover_stalled(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(app.jobs_of("deploy_start").await[0].status, JobStatus::Dead);
    assert_eq!(
        app.deployment(deployment.id).await.status,
        DeploymentStatus::Pending
    );

    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.stale_failed, 1);
    assert_eq!(report.failed, 0);

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    assert_eq!(deployment.failure_kind, Some(FailureKind::Setup));
    assert_eq!(app.runtime.state_of(deployment.id).await, None);
}

#[tokio::test]
async fn test_recent_pending_deployment_is_left_alone() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "main", "abc123").await;

    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.stale_failed, 0);
    assert_eq!(
        app.deployment(deployment.id).await.status,
        DeploymentStatus::Pending
    );
}

#[tokio::test]
async fn test_sweep_continues_past_a_failing_project() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    app.probe.set_all_ready(true).await;

    let broken = factory.create_project().await;
    app.store
        .set_project_status(broken.id, ProjectStatus::Deleted)
        .await
        .unwrap();
    // A directory where the routing file belongs cannot be removed as a file
    std::fs::create_dir_all(app.state.routing.path_for(broken.id)).unwrap();

    let healthy = factory.create_project().await;
    let live = deploy(&app, &factory, healthy.id, "main", "aaa111").await;
    app.runtime.add_running("stray", BTreeMap::new()).await;

    let report = CleanupService::sweep(&app.state).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(report.routing_regenerated, 1);
    assert_eq!(report.orphans_removed, 1);
    assert_eq!(
        app.runtime.state_of(live.id).await,
        Some(ContainerState::Running)
    );
    assert_eq!(app.runtime.container_count().await, 1);
}
