use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::error::AgentError;
use crate::state::AgentState;
use crate::update::UpdateCheck;

/// GET /update/check — poll the orchestrator without applying anything.
pub async fn check(
    State(state): State<Arc<AgentState>>,
) -> Result<Json<UpdateCheck>, AgentError> {
    let check = state.updater.check().await?;
    Ok(Json(check))
}

/// Delay between answering `/update/apply` and re-exec, so the HTTP
/// response makes it back to the caller.
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// POST /update/apply — check, download, swap, and schedule a restart.
pub async fn apply(
    State(state): State<Arc<AgentState>>,
) -> Result<impl IntoResponse, AgentError> {
    let updated = state.updater.check_and_apply().await?;
    if !updated {
        return Ok(Json(json!({ "status": "ok", "updated": false })));
    }

    info!("Update applied via HTTP surface, restarting shortly");
    let restart_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(RESTART_DELAY).await;
        restart_state.updater.restart();
    });

    Ok(Json(json!({
        "status": "ok",
        "updated": true,
        "restarting": true,
    })))
}
