use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{info, warn};

use aiwork_core::error::AiworkError;
use aiwork_core::types::{Status, WorkflowId};
use aiwork_engine::FlowDefinition;

use crate::state::AppState;

type ApiResult = Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)>;

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

fn not_found(e: AiworkError) -> (StatusCode, Json<serde_json::Value>) {
    error_body(StatusCode::NOT_FOUND, e.to_string())
}

// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "framework": "AIWork",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// POST /workflow
pub async fn submit_workflow(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)))?;
    let def = FlowDefinition::from_value(value)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    let mut flow = def
        .placeholder_flow()
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    let context = def.context();

    let workflow_id = WorkflowId::new();
    state
        .state_manager
        .set_workflow_status(workflow_id.as_str(), Status::Pending, Some(&def.name), None);
    info!(workflow_id = %workflow_id, flow = %def.name, tasks = flow.len(), "Workflow submitted");

    let orchestrator = state.orchestrator.clone();
    let run_id = workflow_id.clone();
    tokio::spawn(async move {
        orchestrator.execute(&mut flow, context, Some(run_id)).await;
    });

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": workflow_id.as_str(),
            "status": Status::Pending,
            "message": "Workflow submitted successfully",
        })),
    ))
}

// GET /workflow/{id}
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let wf = state.state_manager.get_workflow_state(&id).map_err(not_found)?;

    let tasks: serde_json::Map<String, serde_json::Value> = wf
        .tasks
        .iter()
        .map(|(name, record)| {
            (
                name.clone(),
                serde_json::json!({
                    "status": record.status,
                    "output": record.output,
                    "error": record.error,
                }),
            )
        })
        .collect();

    let mut body = serde_json::json!({
        "id": wf.id,
        "name": wf.name,
        "status": wf.status,
        "tasks": tasks,
        "created_at": wf.created_at,
        "updated_at": wf.updated_at,
    });
    if let Some(error) = wf.error {
        body["error"] = serde_json::Value::String(error);
    }
    Ok((StatusCode::OK, Json(body)))
}

// GET /workflow/{id}/task/{task_name}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_name)): Path<(String, String)>,
) -> ApiResult {
    let record = state
        .state_manager
        .get_task_record(&id, &task_name)
        .map_err(|e| {
            warn!(workflow_id = %id, task = %task_name, error = %e, "Task lookup failed");
            not_found(e)
        })?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "workflow_id": id,
            "task_name": task_name,
            "status": record.status,
            "output": record.output,
            "error": record.error,
        })),
    ))
}

// GET /workflows
pub async fn list_workflows(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let workflows: Vec<serde_json::Value> = state
        .state_manager
        .list_workflows()
        .into_iter()
        .map(|wf| {
            serde_json::json!({
                "id": wf.id,
                "name": wf.name,
                "status": wf.status,
            })
        })
        .collect();
    Json(serde_json::json!({ "workflows": workflows }))
}

// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "metrics": state.metrics.summary() }))
}
