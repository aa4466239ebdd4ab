use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::error::AgentError;
use crate::state::AgentState;

/// GET /models/config — observed models split into advertised and disabled.
pub async fn config(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let observed = state.llm.status.read().await.models.clone();
    let advertised = state.settings.filter_models(&observed).await;
    let persisted = state.settings.get().await;

    Json(json!({
        "all_models": observed,
        "advertised": advertised,
        "disabled": persisted.llm_disabled_models,
        "disabled_workflows": persisted.render_disabled_workflows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub model: String,
    /// Omitted → flip the current state.
    pub enabled: Option<bool>,
}

/// POST /models/toggle
pub async fn toggle(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<ToggleRequest>,
) -> Result<impl IntoResponse, AgentError> {
    if req.model.is_empty() {
        return Err(AgentError::MalformedRequest("model must not be empty".into()));
    }
    let enabled = state.settings.toggle_model(&req.model, req.enabled).await?;
    Ok(Json(json!({
        "status": "ok",
        "model": req.model,
        "enabled": enabled,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub models: BTreeMap<String, bool>,
}

/// POST /models/set-enabled — bulk visibility update.
pub async fn set_enabled(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<SetEnabledRequest>,
) -> Result<impl IntoResponse, AgentError> {
    state.settings.set_models_enabled(req.models).await?;
    Ok(Json(json!({ "status": "ok" })))
}
