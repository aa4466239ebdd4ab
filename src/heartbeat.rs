use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::error::AgentError;
use crate::state::AgentState;
use crate::workflows;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// POST the node's identity, capabilities, and load state to the
/// orchestrator. Failures are logged and retried on the next cycle.
pub async fn send(state: &Arc<AgentState>) {
    if let Err(e) = try_send(state).await {
        warn!(error = %e, "Heartbeat failed");
    }
}

async fn try_send(state: &Arc<AgentState>) -> Result<(), AgentError> {
    let Some(url) = state.config.server_url("/nodes/heartbeat") else {
        return Ok(());
    };

    // Assemble the snapshot under short-lived locks, then send without
    // holding any of them.
    let payload = build_payload(state).await;

    let resp = state
        .client
        .post(&url)
        .timeout(HEARTBEAT_TIMEOUT)
        .json(&payload)
        .send()
        .await
        .map_err(|e| AgentError::HeartbeatFailed(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AgentError::HeartbeatFailed(format!(
            "orchestrator returned {}",
            resp.status()
        )));
    }

    *state.last_heartbeat.write().await = Some(Utc::now());
    debug!("Heartbeat acknowledged");
    Ok(())
}

/// The heartbeat body: identity, advertised models, catalogs, stats,
/// current jobs, workflow readiness, and hardware.
pub async fn build_payload(state: &Arc<AgentState>) -> Value {
    let llm_snapshot = {
        let status = state.llm.status.read().await;
        (
            status.available,
            status.models.clone(),
            status.current_job.clone(),
            status.jobs_completed,
        )
    };
    let (llm_available, all_models, llm_job, llm_done) = llm_snapshot;
    let advertised = state.settings.filter_models(&all_models).await;

    let (render_available, catalog, render_job, render_done) = {
        let status = state.render.status.read().await;
        (
            status.available,
            status.catalog.clone(),
            status.current_job.clone(),
            status.jobs_completed,
        )
    };

    let llm_stats = state.llm.stats.lock().await.snapshot();
    let render_stats = state.render.stats.lock().await.snapshot();

    let observed = state.render_catalog_flat().await;
    let mut supported = Vec::new();
    let mut ready = Vec::new();
    for spec in workflows::registry() {
        if state.settings.is_workflow_hidden(spec.id).await {
            continue;
        }
        supported.push(spec.id);
        if spec.readiness(&observed).all_available {
            ready.push(spec.id);
        }
    }

    let hardware = state.hardware.read().await.clone();

    json!({
        "node_id": state.identity.node_id,
        "hostname": state.identity.hostname,
        "ip_addresses": state.identity.ip_addresses,
        "platform": state.identity.platform,
        "agent_version": state.identity.agent_version,
        "agent_port": state.identity.agent_port,
        "started_at": state.identity.started_at,
        "uptime_seconds": state.uptime_seconds(),
        "llm": {
            "available": llm_available,
            "port": state.llm.port,
            "models": advertised,
            "all_models": all_models,
            "current_job": llm_job,
            "jobs_completed": llm_done,
        },
        "render": {
            "available": render_available,
            "port": state.render.port,
            "catalog": catalog,
            "current_job": render_job,
            "jobs_completed": render_done,
        },
        "stats": {
            "llm": llm_stats,
            "render": render_stats,
        },
        "workflows": {
            "supported": supported,
            "ready": ready,
        },
        "hardware": hardware,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn payload_filters_disabled_models_but_keeps_all() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        {
            let mut status = state.llm.status.write().await;
            status.available = true;
            status.models = vec!["a:1".into(), "b:2".into(), "c:3".into()];
        }
        state.settings.toggle_model("b:2", Some(false)).await.unwrap();

        let payload = build_payload(&state).await;
        assert_eq!(payload["llm"]["models"], json!(["a:1", "c:3"]));
        assert_eq!(payload["llm"]["all_models"], json!(["a:1", "b:2", "c:3"]));
    }

    #[tokio::test]
    async fn payload_carries_identity_and_workflows() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let payload = build_payload(&state).await;
        assert_eq!(payload["node_id"], json!(state.identity.node_id));
        assert_eq!(payload["agent_port"], json!(8765));
        let supported = payload["workflows"]["supported"].as_array().unwrap();
        assert_eq!(supported.len(), workflows::registry().len());
        // Nothing observed yet, so nothing is ready.
        assert_eq!(payload["workflows"]["ready"], json!([]));
    }

    #[tokio::test]
    async fn hidden_workflows_are_elided() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        {
            let mut config = state.settings.get().await;
            config
                .render_disabled_workflows
                .insert("wan2.2_14B_t2i".to_string());
            // Direct mirror write is not exposed; go through the store's file.
            std::fs::write(
                state.config.config_file(),
                serde_json::to_vec(&config).unwrap(),
            )
            .unwrap();
        }
        let state = test_state(&dir); // reload settings from disk

        let payload = build_payload(&state).await;
        let supported = payload["workflows"]["supported"].as_array().unwrap();
        assert!(!supported.contains(&json!("wan2.2_14B_t2i")));
        assert_eq!(supported.len(), workflows::registry().len() - 1);
    }

    #[tokio::test]
    async fn send_without_server_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        send(&state).await;
        assert!(state.last_heartbeat.read().await.is_none());
    }
}
