use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::api::error::AgentError;
use crate::state::AgentState;
use crate::workflows::{self, WorkflowReadiness, WorkflowSpec};

fn lookup(id: &str) -> Result<&'static WorkflowSpec, AgentError> {
    workflows::find(id).ok_or_else(|| AgentError::UnknownWorkflow(id.to_string()))
}

/// GET /workflows — summaries of every supported pipeline.
pub async fn list(State(_state): State<Arc<AgentState>>) -> impl IntoResponse {
    let summaries: BTreeMap<&str, _> = workflows::registry()
        .iter()
        .map(|w| (w.id, w.summary()))
        .collect();
    Json(json!({ "workflows": summaries }))
}

/// GET /workflows/{id} — the full spec including the parameterised graph.
/// Hidden workflows stay introspectable here.
pub async fn detail(
    State(_state): State<Arc<AgentState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowSpec>, AgentError> {
    Ok(Json(lookup(&id)?.clone()))
}

/// GET /workflows/{id}/download — the raw graph as a JSON attachment. The
/// `{{...}}` sentinels are shipped verbatim; substitution happens upstream.
pub async fn download(
    State(_state): State<Arc<AgentState>>,
    Path(id): Path<String>,
) -> Result<Response, AgentError> {
    let spec = lookup(&id)?;
    let body = spec.graph.to_string();

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}_api.json", spec.id),
            ),
        ],
        body,
    )
        .into_response())
}

/// GET /workflows/{id}/availability — readiness against the observed
/// RENDER catalog.
pub async fn availability(
    State(state): State<Arc<AgentState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowReadiness>, AgentError> {
    let spec = lookup(&id)?;
    let observed = state.render_catalog_flat().await;
    Ok(Json(spec.readiness(&observed)))
}

/// GET /workflows/availability — readiness map over the whole registry.
pub async fn availability_all(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let observed = state.render_catalog_flat().await;
    let map: BTreeMap<&str, WorkflowReadiness> = workflows::registry()
        .iter()
        .map(|w| (w.id, w.readiness(&observed)))
        .collect();
    Json(map)
}
