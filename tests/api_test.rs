mod common;

use axum::http::StatusCode;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use common::{Factory, TestApp};
use dockyard::queue::JobKind;
use dockyard::repositories::ProjectRepository;
use dockyard::services::CleanupService;

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;

    let response = app.server.get("/health").await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.text(), "OK");
}

#[tokio::test]
async fn test_create_deployment() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let response = app
        .server
        .post(&format!("/api/projects/{}/deployments", project.id))
        .json(&json!({
            "branch": "feature/checkout",
            "commit_sha": "abc123",
            "commit_message": "Add checkout"
        }))
        .await;

    response.assert_status(StatusCode::CREATED);

    let body: serde_json::Value = response.json();
    assert_eq!(body["environment_id"].as_str().unwrap(), "preview");
    assert_eq!(body["status"].as_str().unwrap(), "pending");
    assert_eq!(body["trigger"].as_str().unwrap(), "api");
    assert_eq!(body["image"].as_str().unwrap(), "python-3.12");
    // Only keys are exposed
    assert_eq!(body["env_keys"], json!(["DEBUG"]));
    assert!(body.get("env_vars").is_none());

    let start_jobs = app.jobs_of("deploy_start").await;
    assert_eq!(start_jobs.len(), 1);
    assert_eq!(
        start_jobs[0].kind.deployment_id().unwrap().to_string(),
        body["id"].as_str().unwrap()
    );
}

#[tokio::test]
async fn test_create_deployment_with_explicit_environment() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;

    let response = app
        .server
        .post(&format!("/api/projects/{}/deployments", project.id))
        .json(&json!({
            "branch": "hotfix/login",
            "commit_sha": "abc123",
            "trigger": "user",
            "environment_id": "staging"
        }))
        .await;

    response.assert_status(StatusCode::CREATED);

    let body: serde_json::Value = response.json();
    assert_eq!(body["environment_id"].as_str().unwrap(), "staging");
    assert_eq!(body["trigger"].as_str().unwrap(), "user");
}

#[tokio::test]
async fn test_create_deployment_validation() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    let path = format!("/api/projects/{}/deployments", project.id);

    let response = app
        .server
        .post(&path)
        .json(&json!({ "branch": "  ", "commit_sha": "abc123" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    // No environment matches this branch
    let response = app
        .server
        .post(&path)
        .json(&json!({ "branch": "hotfix/login", "commit_sha": "abc123" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"].as_str().unwrap(), "Validation error");

    assert!(app.jobs_of("deploy_start").await.is_empty());
}

#[tokio::test]
async fn test_create_deployment_unknown_project() {
    let app = TestApp::new().await;

    let response = app
        .server
        .post(&format!("/api/projects/{}/deployments", Uuid::new_v4()))
        .json(&json!({ "branch": "main", "commit_sha": "abc123" }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_deployment() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let deployment = factory.create_deployment(project.id, "main", "abc123").await;
    app.settle().await;

    let response = app
        .server
        .get(&format!("/api/deployments/{}", deployment.id))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"].as_str().unwrap(), "completed");
    assert_eq!(body["conclusion"].as_str().unwrap(), "succeeded");
    assert_eq!(body["container_status"].as_str().unwrap(), "running");
    assert_eq!(body["branch"].as_str().unwrap(), "main");

    let response = app
        .server
        .get(&format!("/api/deployments/{}", Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rollback_alias() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    let first = factory.create_deployment(project.id, "main", "aaa111").await;
    app.settle().await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = factory.create_deployment(project.id, "main", "bbb222").await;
    app.settle().await;

    let path = format!("/api/aliases/{}/rollback", project.slug);
    let response = app.server.post(&path).await;

    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["deployment_id"].as_str().unwrap(), first.id.to_string());
    assert_eq!(
        body["previous_deployment_id"].as_str().unwrap(),
        second.id.to_string()
    );
    assert!(!body["rolled_back_at"].is_null());

    // A second rollback has nothing to return to
    let response = app.server.post(&path).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"].as_str().unwrap(), "Rollback unavailable");
}

#[tokio::test]
async fn test_rollback_unknown_alias() {
    let app = TestApp::new().await;

    let response = app.server.post("/api/aliases/nothing-here/rollback").await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preview_and_regenerate_routing() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    let path = format!("/api/projects/{}/routing", project.id);

    // Nothing deployed yet
    let response = app.server.get(&path).await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["routers"], json!([]));
    assert_eq!(body["content"].as_str().unwrap(), "");

    app.probe.set_all_ready(true).await;
    factory.create_deployment(project.id, "main", "abc123").await;
    app.settle().await;

    let response = app.server.get(&path).await;
    response.assert_status(StatusCode::OK);
    let preview: serde_json::Value = response.json();
    let alias_router = format!("router-alias-{}", project.slug);
    let routers = preview["routers"].as_array().unwrap();
    assert!(routers
        .iter()
        .any(|r| r.as_str() == Some(alias_router.as_str())));

    let response = app.server.post(&path).await;
    response.assert_status(StatusCode::OK);
    let regenerated: serde_json::Value = response.json();
    assert_eq!(regenerated["content"], preview["content"]);
    assert_eq!(
        app.routing_file(project.id).await.unwrap(),
        preview["content"].as_str().unwrap()
    );

    let response = app
        .server
        .get(&format!("/api/projects/{}/routing", Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reactivate_project() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    app.probe.set_all_ready(true).await;

    factory.create_deployment(project.id, "main", "abc123").await;
    app.settle().await;

    let idle_since = OffsetDateTime::now_utc() - time::Duration::days(10);
    app.store.record_traffic(project.id, idle_since).await.unwrap();
    CleanupService::sweep(&app.state).await.unwrap();

    let path = format!("/api/projects/{}/reactivate", project.id);
    let response = app.server.post(&path).await;

    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    let deployments = body["deployments"].as_array().unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0]["trigger"].as_str().unwrap(), "reactivation");
    assert_eq!(deployments[0]["commit_sha"].as_str().unwrap(), "abc123");

    // Idempotent once active
    let response = app.server.post(&path).await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["deployments"], json!([]));

    let response = app
        .server
        .post(&format!("/api/projects/{}/reactivate", Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_status_and_stats() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let project = factory.create_project().await;
    let deployment = factory.create_deployment(project.id, "main", "abc123").await;

    let job = app.jobs_of("deploy_start").await.remove(0);
    let response = app.server.get(&format!("/api/jobs/{}", job.id)).await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["job_type"].as_str().unwrap(), "deploy_start");
    assert_eq!(body["status"].as_str().unwrap(), "pending");
    assert_eq!(
        body["deployment_id"].as_str().unwrap(),
        deployment.id.to_string()
    );
    assert_eq!(body["max_attempts"].as_u64().unwrap(), 3);

    let response = app.server.get("/api/jobs/stats").await;
    response.assert_status(StatusCode::OK);
    let stats: serde_json::Value = response.json();
    assert_eq!(stats["pending"].as_u64().unwrap(), 1);
    assert_eq!(stats["dead"].as_u64().unwrap(), 0);

    let response = app.server.get(&format!("/api/jobs/{}", Uuid::new_v4())).await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dead_jobs_can_be_requeued() {
    let app = TestApp::new().await;

    // Finalizing a deployment that does not exist is not retryable
    let job_id = app
        .enqueue(JobKind::DeployFinalize {
            deployment_id: Uuid::new_v4(),
        })
        .await;
    app.drain().await;

    let response = app.server.get("/api/jobs/dead").await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"].as_u64().unwrap(), 1);
    assert_eq!(body["limit"].as_u64().unwrap(), 20);
    assert_eq!(body["data"][0]["job_id"].as_str().unwrap(), job_id.to_string());
    assert_eq!(body["data"][0]["status"].as_str().unwrap(), "dead");
    assert!(body["data"][0]["error_message"].as_str().is_some());

    let response = app
        .server
        .post(&format!("/api/jobs/{}/requeue", job_id))
        .await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"].as_str().unwrap(), "pending");
    assert_eq!(body["attempt"].as_u64().unwrap(), 0);

    // Only dead or failed jobs go back on the queue
    let response = app
        .server
        .post(&format!("/api/jobs/{}/requeue", job_id))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
