use crate::error::ApiError;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use actix_ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{
    FlowError, StepStatus, Task, TaskId, TaskStatus, Value, Workflow, WorkflowId, WorkflowStatus,
};
use taskruntime::TaskRuntime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<TaskRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub inputs: Vec<serde_json::Value>,
}

/// Task record with payloads rendered as plain JSON
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            status: task.status,
            input: task.input.to_plain_json(),
            result: task.result.as_ref().map(Value::to_plain_json),
            error: task.error,
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepView {
    pub name: String,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct WorkflowView {
    pub id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub steps: Vec<StepView>,
    pub results: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Workflow> for WorkflowView {
    fn from(workflow: Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name,
            status: workflow.status,
            input: workflow.input.to_plain_json(),
            steps: workflow
                .steps
                .iter()
                .map(|step| StepView {
                    name: step.name.clone(),
                    status: step.status,
                    result: step.result().map(Value::to_plain_json),
                    error: step.error().map(String::from),
                    started_at: step.started_at,
                    duration_ms: step.duration_ms,
                })
                .collect(),
            results: workflow
                .results
                .iter()
                .map(|(k, v)| (k.clone(), v.to_plain_json()))
                .collect(),
            error: workflow.error,
            created_at: workflow.created_at,
            completed_at: workflow.completed_at,
        }
    }
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "taskflow"
    }))
}

/// Admit one task; it runs in the background
#[post("/api/tasks")]
async fn submit_task(
    data: web::Data<AppState>,
    req: web::Json<SubmitRequest>,
) -> Result<HttpResponse, ApiError> {
    let input = Value::from_plain_json(req.into_inner().input);
    let task_id = data.runtime.submit(input).await?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({ "task_id": task_id })))
}

#[post("/api/tasks/batch")]
async fn submit_task_batch(
    data: web::Data<AppState>,
    req: web::Json<BatchRequest>,
) -> Result<HttpResponse, ApiError> {
    let inputs: Vec<Value> = req
        .into_inner()
        .inputs
        .into_iter()
        .map(Value::from_plain_json)
        .collect();
    let total = inputs.len();
    let task_ids = data.runtime.submit_batch(inputs).await;

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "task_ids": task_ids,
        "rejected": total - task_ids.len(),
    })))
}

#[get("/api/tasks")]
async fn list_tasks(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let tasks: Vec<TaskView> = data
        .runtime
        .executor()
        .get_all_tasks()
        .await
        .into_iter()
        .map(TaskView::from)
        .collect();
    Ok(HttpResponse::Ok().json(tasks))
}

#[get("/api/tasks/{id}")]
async fn get_task(
    data: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> Result<HttpResponse, ApiError> {
    let task = data.runtime.executor().get_task_status(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(TaskView::from(task)))
}

/// Run one workflow to completion and return its record, failed or not
#[post("/api/workflows")]
async fn run_workflow(
    data: web::Data<AppState>,
    req: web::Json<SubmitRequest>,
) -> Result<HttpResponse, ApiError> {
    let input = Value::from_plain_json(req.into_inner().input);
    let workflow = match data.runtime.run_workflow(input).await {
        Ok(workflow) => workflow,
        Err(FlowError::StepFailed { workflow, .. }) => *workflow,
        Err(e) => return Err(e.into()),
    };
    Ok(HttpResponse::Ok().json(WorkflowView::from(workflow)))
}

#[post("/api/workflows/batch")]
async fn run_workflow_batch(
    data: web::Data<AppState>,
    req: web::Json<BatchRequest>,
) -> Result<HttpResponse, ApiError> {
    let inputs: Vec<Value> = req
        .into_inner()
        .inputs
        .into_iter()
        .map(Value::from_plain_json)
        .collect();
    let total = inputs.len();
    let workflow_ids = data.runtime.run_batch(inputs).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "workflow_ids": workflow_ids,
        "rejected": total - workflow_ids.len(),
    })))
}

#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let workflows: Vec<WorkflowView> = data
        .runtime
        .orchestrator()
        .get_all_workflows()
        .await
        .into_iter()
        .map(WorkflowView::from)
        .collect();
    Ok(HttpResponse::Ok().json(workflows))
}

#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> Result<HttpResponse, ApiError> {
    let workflow = data
        .runtime
        .orchestrator()
        .get_workflow(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(WorkflowView::from(workflow)))
}

#[get("/api/status")]
async fn system_status(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.system_status().await)
}

#[get("/api/steps")]
async fn list_step_types(data: web::Data<AppState>) -> impl Responder {
    let registry = data.runtime.registry();
    let steps: Vec<_> = registry
        .list_step_types()
        .iter()
        .map(|step_type| {
            let metadata = registry.get_metadata(step_type);
            serde_json::json!({
                "type": step_type,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    HttpResponse::Ok().json(steps)
}

/// WebSocket stream of execution events
#[get("/api/events")]
async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");
    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("WebSocket client lagged, {} events dropped", n);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(submit_task)
        .service(submit_task_batch)
        .service(list_tasks)
        .service(get_task)
        .service(run_workflow)
        .service(run_workflow_batch)
        .service(list_workflows)
        .service(get_workflow)
        .service(system_status)
        .service(list_step_types)
        .service(websocket_events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::json;
    use std::time::Duration;
    use taskcore::{PipelineSpec, StepSpec};
    use taskruntime::RuntimeConfig;

    async fn state() -> web::Data<AppState> {
        let spec = PipelineSpec::new("video")
            .with_step(StepSpec::new("video_id", "source.video_id"))
            .with_step(StepSpec::new("report", "transform.json_stringify").with_config("from", "video_id"));
        let config = RuntimeConfig {
            dequeue_timeout: Duration::from_millis(20),
            ..RuntimeConfig::default()
        };
        let runtime =
            TaskRuntime::new(Arc::new(tasksteps::standard_registry()), &spec, config).unwrap();
        runtime.start().await;
        web::Data::new(AppState {
            runtime: Arc::new(runtime),
        })
    }

    macro_rules! app {
        ($data:expr) => {
            test::init_service(App::new().app_data($data.clone()).configure(configure)).await
        };
    }

    #[actix_web::test]
    async fn health_and_steps() {
        let data = state().await;
        let app = app!(data);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let steps: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/steps").to_request(),
        )
        .await;
        assert_eq!(steps.as_array().unwrap().len(), 7);
    }

    #[actix_web::test]
    async fn submitted_task_completes() {
        let data = state().await;
        let app = app!(data);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/tasks")
                .set_json(json!({ "input": "https://youtu.be/abcdefghijk" }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let task_id: TaskId = serde_json::from_value(body["task_id"].clone()).unwrap();

        data.runtime.executor().wait(task_id).await.unwrap();

        let task: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/tasks/{}", task_id))
                .to_request(),
        )
        .await;
        assert_eq!(task["status"], "completed");
        assert_eq!(task["result"]["video_id"], "abcdefghijk");
    }

    #[actix_web::test]
    async fn invalid_and_unknown_requests() {
        let data = state().await;
        let app = app!(data);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/tasks")
                .set_json(json!({ "input": null }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/workflows/{}", WorkflowId::new_v4()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[actix_web::test]
    async fn failed_workflow_is_returned_with_its_error() {
        let data = state().await;
        let app = app!(data);

        let workflow: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/workflows")
                .set_json(json!({ "input": "https://vimeo.com/1" }))
                .to_request(),
        )
        .await;
        assert_eq!(workflow["status"], "failed");
        assert_eq!(workflow["steps"].as_array().unwrap().len(), 1);
        assert!(workflow["error"].is_string());

        let batch: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/workflows/batch")
                .set_json(json!({ "inputs": ["https://youtu.be/abcdefghijk", "", "nope"] }))
                .to_request(),
        )
        .await;
        assert_eq!(batch["workflow_ids"].as_array().unwrap().len(), 2);
        assert_eq!(batch["rejected"], 1);

        let status: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/status").to_request(),
        )
        .await;
        assert_eq!(status["workflows"], 3);
        assert_eq!(status["completed_workflows"], 1);
        assert_eq!(status["failed_workflows"], 2);
    }
}
