use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::api::error::AgentError;
use crate::state::{AgentState, Job, JobType, ServiceKind};

fn parse_service(value: &str) -> Result<ServiceKind, AgentError> {
    value.parse()
}

#[derive(Debug, Deserialize)]
pub struct JobStartRequest {
    pub service: String,
    pub job_id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub model: Option<String>,
    pub workflow: Option<String>,
    pub prompt: Option<String>,
}

/// POST /job/start — manual registration for work the orchestrator routes
/// around the proxy (e.g. direct service submissions it still wants
/// reflected in node state).
pub async fn start(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<JobStartRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let kind = parse_service(&req.service)?;

    let job_type = match req.job_type.as_deref() {
        Some("generate") => JobType::Generate,
        Some("chat") => JobType::Chat,
        Some("render") => JobType::Render,
        Some(other) => {
            return Err(AgentError::MalformedRequest(format!(
                "unknown job type {other}"
            )));
        }
        None => match kind {
            ServiceKind::Llm => JobType::Generate,
            ServiceKind::Render => JobType::Render,
        },
    };

    let workflow_nodes = req
        .workflow
        .as_deref()
        .and_then(crate::workflows::find)
        .map(|spec| spec.node_count());

    let prompt_preview = req.prompt.map(|p| p.chars().take(100).collect());

    state
        .begin_job(
            kind,
            Job {
                id: req.job_id,
                job_type,
                model: req.model,
                workflow_nodes,
                prompt_preview,
                started_at: Utc::now(),
            },
        )
        .await;

    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct JobCompleteRequest {
    pub service: String,
    pub status: Option<String>,
}

/// POST /job/complete — settle a manually registered job.
pub async fn complete(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<JobCompleteRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let kind = parse_service(&req.service)?;
    let terminal = req.status.as_deref().unwrap_or("completed");
    let recorded = state.finish_job(kind, terminal).await.is_some();
    Ok(Json(json!({ "status": "ok", "recorded": recorded })))
}

/// GET /jobs/history — newest-first, at most 50 entries.
pub async fn history(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let history = state.jobs_history.lock().await;
    Json(json!({ "jobs": history.iter().cloned().collect::<Vec<_>>() }))
}

/// GET /logs — both communication rings.
pub async fn logs_all(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let llm = state.comlog.entries(ServiceKind::Llm).await;
    let render = state.comlog.entries(ServiceKind::Render).await;
    Json(json!({ "llm": llm, "render": render }))
}

/// GET /logs/{service}
pub async fn logs_service(
    State(state): State<Arc<AgentState>>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, AgentError> {
    let kind = parse_service(&service)?;
    let entries = state.comlog.entries(kind).await;
    Ok(Json(json!({ "service": kind, "entries": entries })))
}

/// POST /logs/{service}/clear
pub async fn logs_clear(
    State(state): State<Arc<AgentState>>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, AgentError> {
    let kind = parse_service(&service)?;
    state.comlog.clear(kind).await;
    Ok(Json(json!({ "status": "ok" })))
}
