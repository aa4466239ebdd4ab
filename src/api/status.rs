use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::hardware;
use crate::state::{AgentState, ServiceKind};
use crate::workflows;

/// GET /status — the full node snapshot.
pub async fn full_status(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let llm = service_view(&state, ServiceKind::Llm).await;
    let render = service_view(&state, ServiceKind::Render).await;

    let llm_stats = state.llm.stats.lock().await.snapshot();
    let render_stats = state.render.stats.lock().await.snapshot();

    let observed = state.render_catalog_flat().await;
    let ready: Vec<&str> = workflows::registry()
        .iter()
        .filter(|w| w.readiness(&observed).all_available)
        .map(|w| w.id)
        .collect();

    let history_len = state.jobs_history.lock().await.len();
    let config = state.settings.get().await;

    Json(json!({
        "identity": state.identity,
        "uptime_seconds": state.uptime_seconds(),
        "services": {
            "llm": llm,
            "render": render,
        },
        "stats": {
            "llm": llm_stats,
            "render": render_stats,
        },
        "workflows_ready": ready,
        "jobs_in_history": history_len,
        "config": config,
        "last_heartbeat": *state.last_heartbeat.read().await,
        "timestamp": Utc::now(),
    }))
}

async fn service_view(state: &Arc<AgentState>, kind: ServiceKind) -> serde_json::Value {
    let service = state.service(kind);
    let status = service.status.read().await;
    match kind {
        ServiceKind::Llm => json!({
            "available": status.available,
            "port": service.port,
            "models": status.models,
            "current_job": status.current_job,
            "jobs_completed": status.jobs_completed,
        }),
        ServiceKind::Render => json!({
            "available": status.available,
            "port": service.port,
            "catalog": status.catalog,
            "current_job": status.current_job,
            "jobs_completed": status.jobs_completed,
        }),
    }
}

/// GET /version
pub async fn version(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let hash = state.updater.current_hash().unwrap_or_else(|_| "unknown".to_string());
    Json(json!({
        "version": state.identity.agent_version,
        "hash": hash,
        "hostname": state.identity.hostname,
        "node_id": state.identity.node_id,
    }))
}

/// GET /health — liveness plus sidecar availability at a glance.
pub async fn health(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let llm = state.llm.status.read().await.available;
    let render = state.render.status.read().await.available;
    Json(json!({
        "status": "ok",
        "version": state.identity.agent_version,
        "node_id": state.identity.node_id,
        "hostname": state.identity.hostname,
        "llm": llm,
        "render": render,
    }))
}

/// GET /hardware — cached inventory, collected on demand before the first
/// probe cycle lands.
pub async fn hardware(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    if let Some(snapshot) = state.hardware.read().await.clone() {
        return Json(snapshot);
    }
    let snapshot = hardware::collect().await;
    *state.hardware.write().await = Some(snapshot.clone());
    Json(snapshot)
}

/// GET /stats
pub async fn stats(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let llm = state.llm.stats.lock().await.snapshot();
    let render = state.render.stats.lock().await.snapshot();
    Json(json!({
        "llm": llm,
        "render": render,
        "uptime_seconds": state.uptime_seconds(),
        "timestamp": Utc::now(),
    }))
}

/// POST /stats/reset
pub async fn reset_stats(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    state.llm.stats.lock().await.reset();
    state.render.stats.lock().await.reset();
    Json(json!({ "status": "ok" }))
}
