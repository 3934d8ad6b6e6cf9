use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use aiwork_core::config::ExecutorConfig;
use aiwork_core::context::Context;
use aiwork_core::types::{Status, WorkflowId};
use aiwork_engine::{LocalExecutor, MetricsRegistry, Orchestrator};
use aiwork_gateway::{router, AppState};
use aiwork_test_utils::{failing_task, two_step_flow};

fn test_state() -> Arc<AppState> {
    let metrics = Arc::new(MetricsRegistry::new());
    let executor = LocalExecutor::new(ExecutorConfig::default(), metrics.clone());
    let orchestrator = Arc::new(Orchestrator::new().with_executor(Arc::new(executor)));
    Arc::new(AppState {
        state_manager: orchestrator.state_manager().clone(),
        orchestrator,
        metrics,
    })
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for_terminal(app: &Router, id: &str) -> serde_json::Value {
    for _ in 0..100 {
        let (status, body) = send(app, get(&format!("/workflow/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "COMPLETED" || body["status"] == "FAILED" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("workflow {} did not finish", id);
}

#[tokio::test]
async fn test_health() {
    let app = router(test_state());
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_submit_and_poll() {
    let app = router(test_state());
    let (status, body) = send(
        &app,
        post_json(
            "/workflow",
            serde_json::json!({
                "name": "api_flow",
                "tasks": [
                    {"name": "extract", "depends_on": []},
                    {"name": "load", "depends_on": ["extract"]}
                ],
                "context": {"source": "s3"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING");
    let id = body["id"].as_str().unwrap().to_string();

    let wf = wait_for_terminal(&app, &id).await;
    assert_eq!(wf["status"], "COMPLETED");
    assert_eq!(wf["name"], "api_flow");
    assert_eq!(wf["tasks"]["load"]["status"], "COMPLETED");
    assert_eq!(wf["tasks"]["extract"]["output"]["status"], "executed");
    assert!(wf.get("error").is_none());

    let (status, task) = send(&app, get(&format!("/workflow/{}/task/load", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["workflow_id"], id.as_str());
    assert_eq!(task["task_name"], "load");
    assert_eq!(task["status"], "COMPLETED");
    assert_eq!(task["output"]["status"], "executed");

    let (_, listed) = send(&app, get("/workflows")).await;
    assert!(listed["workflows"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w["id"] == id.as_str()));

    let (_, metrics) = send(&app, get("/metrics")).await;
    assert_eq!(metrics["metrics"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_null_context_accepted() {
    let app = router(test_state());
    let (status, body) = send(
        &app,
        post_json(
            "/workflow",
            serde_json::json!({
                "name": "no_context",
                "tasks": [{"name": "only"}],
                "context": null
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let id = body["id"].as_str().unwrap().to_string();
    let done = wait_for_terminal(&app, &id).await;
    assert_eq!(done["status"], "COMPLETED");
}

#[tokio::test]
async fn test_submit_validation() {
    let app = router(test_state());

    let (status, body) = send(&app, post_json("/workflow", serde_json::json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("'name' and 'tasks'"));

    let (status, body) = send(
        &app,
        post_json(
            "/workflow",
            serde_json::json!({"name": "x", "tasks": [{"depends_on": []}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("'name' field"));

    let req = Request::builder()
        .method("POST")
        .uri("/workflow")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cyclic_submission_fails() {
    let app = router(test_state());
    let (status, body) = send(
        &app,
        post_json(
            "/workflow",
            serde_json::json!({
                "name": "loop",
                "tasks": [
                    {"name": "a", "depends_on": ["b"]},
                    {"name": "b", "depends_on": ["a"]}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let wf = wait_for_terminal(&app, body["id"].as_str().unwrap()).await;
    assert_eq!(wf["status"], "FAILED");
    assert!(wf["error"].as_str().unwrap().contains("Cycle detected"));
}

#[tokio::test]
async fn test_unknown_lookups_404() {
    let app = router(test_state());

    let (status, body) = send(&app, get("/workflow/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));

    let (status, _) = send(&app, get("/workflow/does-not-exist/task/a")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reads_state_written_by_orchestrator() {
    let state = test_state();
    let app = router(state.clone());

    let mut flow = two_step_flow();
    state
        .orchestrator
        .execute(&mut flow, Context::new(), Some(WorkflowId::from("wf-direct")))
        .await;

    let (status, wf) = send(&app, get("/workflow/wf-direct")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wf["tasks"]["second"]["output"], "data1_data2");

    let mut failing = aiwork_engine::Flow::new("failing");
    failing
        .add_task(failing_task("failing_task", "Intentional failure").with_retries(0), &[])
        .unwrap();
    state
        .orchestrator
        .execute(&mut failing, Context::new(), Some(WorkflowId::from("wf-fail")))
        .await;

    let (_, wf) = send(&app, get("/workflow/wf-fail")).await;
    assert_eq!(wf["status"], "FAILED");
    assert_eq!(wf["error"], "Intentional failure");
    let (status, task) = send(&app, get("/workflow/wf-fail/task/failing_task")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "FAILED");
    assert_eq!(task["error"], "Intentional failure");

    let pending = state.state_manager.get_task_status("wf-fail", "never_ran").unwrap();
    assert_eq!(pending, Status::Pending);
}
