mod common;

use std::time::Duration;

use common::{Factory, TestApp};
use dockyard::error::AppError;
use dockyard::models::{
    Conclusion, ContainerStatus, DeploymentStatus, FailureKind, ProjectStatus, StatusTransition,
    Trigger,
};
use dockyard::queue::JobStatus;
use dockyard::repositories::{AliasRepository, DeploymentRepository, ProjectRepository};
use dockyard::routing::alias_host;
use dockyard::runtime::ContainerState;
use dockyard::services::{
    AliasService, CreateDeployment, DeploymentService, EventType, RoutingService,
};

#[tokio::test]
async fn test_deploy_to_staging_swaps_alias() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let prior = factory.create_deployment(project.id, "develop", "prior1").await;
    app.settle().await;
    assert!(app.deployment(prior.id).await.is_succeeded());

    tokio::time::sleep(Duration::from_millis(5)).await;
    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    assert_eq!(deployment.status, DeploymentStatus::Pending);
    assert_eq!(deployment.environment_id, "staging");

    let summary = app.settle().await;
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.finalized, 1);

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.conclusion, Some(Conclusion::Succeeded));
    assert!(deployment.started_at.is_some());
    assert!(deployment.concluded_at.is_some());

    let alias = app
        .store
        .find_alias(&format!("{}-env-staging", project.slug))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alias.deployment_id, deployment.id);
    assert_eq!(alias.previous_deployment_id, Some(prior.id));
    assert_eq!(alias.version, 2);

    // Branch and environment-id aliases move together
    for key in [
        format!("{}-branch-develop", project.slug),
        format!("{}-env-id-staging", project.slug),
    ] {
        let alias = app.store.find_alias(&key).await.unwrap().unwrap();
        assert_eq!(alias.deployment_id, deployment.id);
    }

    let host = alias_host(&app.state.config, &alias.key);
    let snapshot = RoutingService::resolve(&app.state, project.id).await.unwrap();
    assert_eq!(snapshot.deployment_for_host(&host), Some(deployment.id));
    assert!(app.routing_file(project.id).await.is_some());
}

#[tokio::test]
async fn test_deployment_freezes_config_and_env_vars() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    assert_eq!(deployment.env_vars["DEBUG"], "1");
    assert_eq!(deployment.config, project.config);
    assert_eq!(deployment.trigger, Trigger::Webhook);

    app.drain().await;

    let spec = app.runtime.spec_for(deployment.id).await.unwrap();
    assert_eq!(spec.name, deployment.container_name());
    assert_eq!(spec.image, "runner-python-3.12");
    assert_eq!(spec.env["DEBUG"], "1");
    assert_eq!(spec.env["PORT"], "8000");

    let started = app.deployment(deployment.id).await;
    assert_eq!(started.status, DeploymentStatus::InProgress);
    assert_eq!(started.container_status, Some(ContainerStatus::Running));

    let created = app.publisher.events_of(EventType::DeploymentCreated).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].deployment_id, Some(deployment.id));
}

#[tokio::test]
async fn test_build_failure_leaves_aliases_alone() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let live = factory.create_deployment(project.id, "develop", "good01").await;
    app.settle().await;

    let broken = factory.create_deployment(project.id, "develop", "bad002").await;
    app.runtime.exit_on_start(broken.id, 86).await;

    let summary = app.settle().await;
    assert_eq!(summary.failed, 1);

    let broken = app.deployment(broken.id).await;
    assert_eq!(broken.conclusion, Some(Conclusion::Failed));
    assert_eq!(broken.failure_kind, Some(FailureKind::Build));
    assert_eq!(broken.container_status, Some(ContainerStatus::Removed));
    assert!(app.runtime.state_of(broken.id).await.is_none());

    let alias = app
        .store
        .find_alias(&format!("{}-env-staging", project.slug))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alias.deployment_id, live.id);
    assert_eq!(alias.version, 1);

    let updates = app
        .publisher
        .events_of(EventType::DeploymentStatusUpdate)
        .await;
    let last = updates.last().unwrap();
    assert_eq!(last.deployment_id, Some(broken.id));
    assert_eq!(last.deployment_status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn test_health_timeout_fails_and_removes_container() {
    let app = TestApp::with_config(|c| c.deployment_timeout = Duration::ZERO).await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "slow01").await;
    let summary = app.settle().await;
    assert_eq!(summary.failed, 1);

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    assert_eq!(deployment.failure_kind, Some(FailureKind::Timeout));
    assert!(app.runtime.state_of(deployment.id).await.is_none());

    let aliases = app.store.list_aliases_by_project(project.id).await.unwrap();
    assert!(aliases.is_empty());
}

#[tokio::test]
async fn test_concurrent_finalizes_keep_newest_live() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let older = factory.create_deployment(project.id, "develop", "aaa111").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = factory.create_deployment(project.id, "develop", "bbb222").await;
    app.drain().await;

    let (a, b) = tokio::join!(
        DeploymentService::finalize(&app.state, older.id),
        DeploymentService::finalize(&app.state, newer.id),
    );
    a.unwrap();
    b.unwrap();

    for key in [
        format!("{}-env-staging", project.slug),
        format!("{}-branch-develop", project.slug),
        format!("{}-env-id-staging", project.slug),
    ] {
        let alias = app.store.find_alias(&key).await.unwrap().unwrap();
        assert_eq!(alias.deployment_id, newer.id, "alias {}", key);
        assert_ne!(alias.previous_deployment_id, Some(newer.id));
    }

    // A late finalize of the older deployment is a no-op for aliases
    DeploymentService::finalize(&app.state, older.id).await.unwrap();
    let alias = app
        .store
        .find_alias(&format!("{}-env-staging", project.slug))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alias.deployment_id, newer.id);
}

#[tokio::test]
async fn test_alias_version_cas_rejects_stale_writer() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    factory.create_deployment(project.id, "main", "abc123").await;
    app.settle().await;

    let key = project.slug.clone();
    let alias = app.store.find_alias(&key).await.unwrap().unwrap();

    let mut first = alias.clone();
    first.version += 1;
    let mut second = alias.clone();
    second.version += 1;

    assert!(app.store.update_alias(&first, alias.version).await.unwrap());
    assert!(!app.store.update_alias(&second, alias.version).await.unwrap());
}

#[tokio::test]
async fn test_rollback_restores_previous_deployment() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let prior = factory.create_deployment(project.id, "develop", "prior1").await;
    app.settle().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let current = factory.create_deployment(project.id, "develop", "abc123").await;
    app.settle().await;

    let key = format!("{}-env-staging", project.slug);
    let alias = AliasService::rollback(&app.state, &key).await.unwrap();
    assert_eq!(alias.deployment_id, prior.id);
    assert_eq!(alias.previous_deployment_id, Some(current.id));
    assert!(alias.rolled_back_at.is_some());

    let host = alias_host(&app.state.config, &key);
    let snapshot = RoutingService::resolve(&app.state, project.id).await.unwrap();
    assert_eq!(snapshot.deployment_for_host(&host), Some(prior.id));
    let file = app.routing_file(project.id).await.unwrap();
    assert!(file.contains(&format!("runner-{}", prior.id.simple())));

    let rollbacks = app.publisher.events_of(EventType::DeploymentRollback).await;
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0].deployment_id, Some(prior.id));

    // Second rollback without a deploy in between
    let err = AliasService::rollback(&app.state, &key).await.unwrap_err();
    assert!(matches!(err, AppError::NoPreviousDeployment(_)));
    let unchanged = app.store.find_alias(&key).await.unwrap().unwrap();
    assert_eq!(unchanged.version, alias.version);
    assert_eq!(unchanged.deployment_id, prior.id);

    // A replayed finalize of the rolled-back deployment does not undo it
    DeploymentService::finalize(&app.state, current.id).await.unwrap();
    let after = app.store.find_alias(&key).await.unwrap().unwrap();
    assert_eq!(after.deployment_id, prior.id);
}

#[tokio::test]
async fn test_rollback_requires_live_previous_container() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let prior = factory.create_deployment(project.id, "main", "prior1").await;
    app.settle().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    factory.create_deployment(project.id, "main", "abc123").await;
    app.settle().await;

    app.runtime.vanish(prior.id).await;

    let err = AliasService::rollback(&app.state, &project.slug)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PreviousNotLive(_)));
}

#[tokio::test]
async fn test_rollback_without_previous() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    factory.create_deployment(project.id, "main", "abc123").await;
    app.settle().await;

    let err = AliasService::rollback(&app.state, &project.slug)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoPreviousDeployment(_)));

    let err = AliasService::rollback(&app.state, "missing-alias")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_finalize_rejects_deployment_not_in_progress() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;

    let err = DeploymentService::finalize(&app.state, deployment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_completed_status_is_never_reopened() {
    let app = TestApp::with_config(|c| c.deployment_timeout = Duration::ZERO).await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    app.settle().await;
    assert_eq!(
        app.deployment(deployment.id).await.conclusion,
        Some(Conclusion::Failed)
    );

    // Late start, finalize and fail jobs all leave the row alone
    DeploymentService::start(&app.state, deployment.id, false)
        .await
        .unwrap();
    assert!(DeploymentService::finalize(&app.state, deployment.id)
        .await
        .is_err());
    app.probe.set_all_ready(true).await;
    app.tick().await;

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    assert_eq!(deployment.failure_kind, Some(FailureKind::Timeout));
}

#[tokio::test]
async fn test_transient_start_error_is_retried() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    app.runtime
        .fail_next_start(AppError::Runtime("engine busy".to_string()))
        .await;

    app.drain().await;
    assert_eq!(
        app.deployment(deployment.id).await.status,
        DeploymentStatus::Pending
    );
    let jobs = app.jobs_of("deploy_start").await;
    assert_eq!(jobs[0].status, JobStatus::Failed);

    app.drain_all().await;
    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::InProgress);
    // The container created by the first attempt is reused
    assert_eq!(app.runtime.container_count().await, 1);
}

#[tokio::test]
async fn test_final_start_attempt_fails_deployment() {
    let app = TestApp::with_config(|c| c.job_max_attempts = 1).await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    app.runtime
        .fail_next_create(AppError::Runtime("engine unavailable".to_string()))
        .await;
    app.drain().await;

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    assert_eq!(deployment.failure_kind, Some(FailureKind::Setup));
    assert_eq!(app.runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_inactive_project_skips_deployment() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    app.store
        .set_project_status(project.id, ProjectStatus::Inactive)
        .await
        .unwrap();
    app.drain().await;

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.conclusion, Some(Conclusion::Skipped));
    assert_eq!(app.runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_create_validates_input() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let input = |branch: &str, environment_id: Option<&str>| CreateDeployment {
        project_id: project.id,
        branch: branch.to_string(),
        commit_sha: "abc123".to_string(),
        commit_message: None,
        trigger: Trigger::Api,
        environment_id: environment_id.map(str::to_string),
    };

    let err = DeploymentService::create(&app.state, input("hotfix", None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = DeploymentService::create(&app.state, input("main", Some("qa")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let preview = DeploymentService::create(&app.state, input("feature/login", None))
        .await
        .unwrap();
    assert_eq!(preview.environment_id, "preview");

    let explicit = DeploymentService::create(&app.state, input("hotfix", Some("staging")))
        .await
        .unwrap();
    assert_eq!(explicit.environment_id, "staging");

    let mut missing = input("main", None);
    missing.project_id = uuid::Uuid::new_v4();
    let err = DeploymentService::create(&app.state, missing)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_crashed_container_fails_runtime() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let deployment = factory.create_deployment(project.id, "develop", "abc123").await;
    app.drain().await;
    assert_eq!(
        app.runtime.state_of(deployment.id).await,
        Some(ContainerState::Running)
    );

    app.runtime.exit(deployment.id, 1).await;
    app.settle().await;

    let deployment = app.deployment(deployment.id).await;
    assert_eq!(deployment.failure_kind, Some(FailureKind::Runtime));
    assert_eq!(
        deployment.failure_reason.as_deref(),
        Some("Container exited with code 1")
    );
}

#[tokio::test]
async fn test_finalize_replay_refuses_missing_container() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let first = factory.create_deployment(project.id, "main", "aaa111").await;
    app.settle().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = factory.create_deployment(project.id, "main", "bbb222").await;
    app.drain().await;

    // Concluded without a swap, then its container went away
    assert!(app
        .store
        .transition(
            second.id,
            &[DeploymentStatus::InProgress],
            StatusTransition::succeeded(),
        )
        .await
        .unwrap());
    app.runtime.vanish(second.id).await;

    let err = DeploymentService::finalize(&app.state, second.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ContainerNotLive { .. }));
    assert!(!err.is_retryable());

    let alias = app.store.find_alias(&project.slug).await.unwrap().unwrap();
    assert_eq!(alias.deployment_id, first.id);
    let host = alias_host(&app.state.config, &project.slug);
    let snapshot = RoutingService::resolve(&app.state, project.id).await.unwrap();
    assert_eq!(snapshot.deployment_for_host(&host), Some(first.id));
}
