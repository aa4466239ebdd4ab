use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::error::AgentError;
use crate::state::{AgentState, ServiceKind};
use crate::workflows;

/// GET /capabilities — identity, advertised services, workflow readiness,
/// and a hardware summary, shaped for the orchestrator's node table.
pub async fn capabilities(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let (llm_available, all_models, llm_busy, llm_done) = {
        let status = state.llm.status.read().await;
        (
            status.available,
            status.models.clone(),
            status.current_job.is_some(),
            status.jobs_completed,
        )
    };
    let advertised = state.settings.filter_models(&all_models).await;

    let (render_available, catalog, render_busy, render_done) = {
        let status = state.render.status.read().await;
        (
            status.available,
            status.catalog.clone(),
            status.current_job.is_some(),
            status.jobs_completed,
        )
    };

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
    let hardware_summary = hardware.as_ref().map(|hw| {
        json!({
            "cpu_model": hw.cpu.model,
            "physical_cores": hw.cpu.physical_cores,
            "logical_cores": hw.cpu.logical_cores,
            "memory_total_mb": hw.memory.total_mb,
            "gpu_count": hw.gpus.len(),
            "gpu_names": hw.gpus.iter().map(|g| g.name.clone()).collect::<Vec<_>>(),
            "vram_total_mb": hw.gpus.iter().map(|g| g.vram_total_mb).sum::<u64>(),
        })
    });

    let llm_stats = state.llm.stats.lock().await.snapshot();
    let render_stats = state.render.stats.lock().await.snapshot();

    Json(json!({
        "node_id": state.identity.node_id,
        "hostname": state.identity.hostname,
        "ip_addresses": state.identity.ip_addresses,
        "platform": state.identity.platform,
        "agent_version": state.identity.agent_version,
        "agent_port": state.identity.agent_port,
        "services": {
            "llm": {
                "available": llm_available,
                "port": state.llm.port,
                "models": advertised,
                "all_models": all_models,
                "busy": llm_busy,
                "jobs_completed": llm_done,
            },
            "render": {
                "available": render_available,
                "port": state.render.port,
                "catalog": catalog,
                "busy": render_busy,
                "jobs_completed": render_done,
            },
        },
        "workflows": {
            "supported": supported,
            "ready": ready,
        },
        "capacity": {
            "llm_busy": llm_busy,
            "render_busy": render_busy,
            "has_gpu": hardware.as_ref().map(|h| h.has_gpu()).unwrap_or(false),
            "vram_usage_percent": hardware.as_ref().and_then(|h| h.vram_usage_percent()),
        },
        "hardware_summary": hardware_summary,
        "performance": {
            "llm": llm_stats,
            "render": render_stats,
        },
    }))
}

/// GET /load-balance-info — the compact per-node object the orchestrator
/// polls when distributing work.
pub async fn load_balance_info(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let (llm_available, llm_busy) = {
        let status = state.llm.status.read().await;
        (status.available, status.current_job.is_some())
    };
    let (render_available, render_busy) = {
        let status = state.render.status.read().await;
        (status.available, status.current_job.is_some())
    };

    let llm = state.llm.stats.lock().await.snapshot();
    let render = state.render.stats.lock().await.snapshot();
    let hardware = state.hardware.read().await.clone();

    Json(json!({
        "node_id": state.identity.node_id,
        "timestamp": Utc::now(),
        "llm": {
            "available": llm_available,
            "busy": llm_busy,
            "avg_response_time_ms": llm.avg_response_time_ms,
            "success_rate": llm.success_rate,
            "requests_per_minute": llm.requests_per_minute,
        },
        "render": {
            "available": render_available,
            "busy": render_busy,
            "avg_response_time_ms": render.avg_response_time_ms,
            "success_rate": render.success_rate,
            "requests_per_minute": render.requests_per_minute,
        },
        "gpu": {
            "present": hardware.as_ref().map(|h| h.has_gpu()).unwrap_or(false),
            "vram_usage_percent": hardware.as_ref().and_then(|h| h.vram_usage_percent()),
            "vram_free_mb": hardware
                .as_ref()
                .map(|h| h.gpus.iter().map(|g| g.vram_free_mb).sum::<u64>()),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct CanHandleRequest {
    pub job_type: String,
    pub model: Option<String>,
    pub workflow_id: Option<String>,
    pub priority: Option<String>,
}

/// Routing decision returned to the orchestrator.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Decision {
    pub can_handle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_ms: Option<u64>,
}

impl Decision {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            can_handle: false,
            reason: Some(reason.into()),
            score: 0,
            estimated_wait_ms: None,
        }
    }
}

/// POST /can-handle — score this node for a prospective job.
pub async fn can_handle(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<CanHandleRequest>,
) -> Result<Json<Decision>, AgentError> {
    let kind: ServiceKind = req.job_type.parse()?;
    let high_priority = req.priority.as_deref() == Some("high");

    let decision = match kind {
        ServiceKind::Llm => {
            let (available, models, busy) = {
                let status = state.llm.status.read().await;
                (
                    status.available,
                    status.models.clone(),
                    status.current_job.is_some(),
                )
            };
            let advertised = state.settings.filter_models(&models).await;
            let model_known = req
                .model
                .as_ref()
                .map(|m| advertised.iter().any(|a| a == m))
                .unwrap_or(true);

            let stats = state.llm.stats.lock().await.snapshot();
            score_llm(
                available,
                model_known,
                req.model.as_deref(),
                stats.avg_response_time_ms,
                stats.success_rate,
                busy,
                high_priority,
            )
        }
        ServiceKind::Render => {
            let (available, busy) = {
                let status = state.render.status.read().await;
                (status.available, status.current_job.is_some())
            };
            let hardware = state.hardware.read().await.clone();
            let has_gpu = hardware.as_ref().map(|h| h.has_gpu()).unwrap_or(false);
            let vram_percent = hardware.as_ref().and_then(|h| h.vram_usage_percent());

            let missing_slots = match req.workflow_id.as_deref() {
                Some(id) => match workflows::find(id) {
                    Some(spec) => {
                        let observed = state.render_catalog_flat().await;
                        let readiness = spec.readiness(&observed);
                        Some(
                            readiness
                                .slots
                                .values()
                                .filter(|s| !s.available)
                                .map(|s| s.name.clone())
                                .collect::<Vec<_>>(),
                        )
                    }
                    None => None, // unknown id, rejected below
                },
                None => Some(Vec::new()),
            };

            let stats = state.render.stats.lock().await.snapshot();
            score_render(
                available,
                has_gpu,
                vram_percent,
                req.workflow_id.as_deref(),
                missing_slots,
                stats.avg_response_time_ms,
                stats.success_rate,
                busy,
                high_priority,
            )
        }
    };

    Ok(Json(decision))
}

/// LLM scoring: start at 100; −20 when slow, −30 when flaky, −40 when busy.
/// A busy node at normal priority is still accepted, pinned to score 30.
fn score_llm(
    available: bool,
    model_known: bool,
    model: Option<&str>,
    avg_ms: f64,
    success_rate: f64,
    busy: bool,
    high_priority: bool,
) -> Decision {
    if !available {
        return Decision::reject("LLM service unavailable");
    }
    if !model_known {
        return Decision::reject(format!(
            "model {} not available on this node",
            model.unwrap_or("?")
        ));
    }

    let mut score: i64 = 100;
    if avg_ms > 10_000.0 {
        score -= 20;
    }
    if success_rate < 95.0 {
        score -= 30;
    }
    if busy {
        score -= 40;
        if !high_priority {
            score = 30;
        }
    }

    Decision {
        can_handle: true,
        reason: None,
        score: score.max(0) as u32,
        estimated_wait_ms: busy.then_some(avg_ms as u64),
    }
}

/// RENDER scoring: hard-rejects on missing GPU, full VRAM, or unmet
/// workflow requirements; otherwise the same deduction scheme as LLM with
/// a VRAM-pressure penalty.
#[allow(clippy::too_many_arguments)]
fn score_render(
    available: bool,
    has_gpu: bool,
    vram_percent: Option<f64>,
    workflow_id: Option<&str>,
    missing_slots: Option<Vec<String>>,
    avg_ms: f64,
    success_rate: f64,
    busy: bool,
    high_priority: bool,
) -> Decision {
    if !available {
        return Decision::reject("RENDER service unavailable");
    }
    if !has_gpu {
        return Decision::reject("no GPU available");
    }
    if vram_percent.is_some_and(|v| v >= 95.0) {
        return Decision::reject("GPU memory full");
    }

    let missing = match missing_slots {
        Some(missing) => missing,
        None => {
            return Decision::reject(format!(
                "unknown workflow {}",
                workflow_id.unwrap_or("?")
            ));
        }
    };
    if !missing.is_empty() {
        return Decision::reject(format!("missing required models: {}", missing.join(", ")));
    }

    let mut score: i64 = 100;
    if vram_percent.is_some_and(|v| v >= 80.0) {
        score -= 20;
    }
    if success_rate < 95.0 {
        score -= 30;
    }
    if busy {
        score -= 40;
        if !high_priority {
            score = 30;
        }
    }

    Decision {
        can_handle: true,
        reason: None,
        score: score.max(0) as u32,
        estimated_wait_ms: busy.then_some(avg_ms as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // LLM scoring
    // -----------------------------------------------------------------------

    #[test]
    fn llm_idle_healthy_scores_100() {
        let d = score_llm(true, true, Some("a:1"), 500.0, 100.0, false, false);
        assert!(d.can_handle);
        assert_eq!(d.score, 100);
        assert!(d.estimated_wait_ms.is_none());
    }

    #[test]
    fn llm_unavailable_rejects() {
        let d = score_llm(false, true, Some("a:1"), 0.0, 100.0, false, false);
        assert!(!d.can_handle);
        assert_eq!(d.score, 0);
        assert!(d.reason.unwrap().contains("unavailable"));
    }

    #[test]
    fn llm_unknown_model_rejects() {
        let d = score_llm(true, false, Some("x:9"), 0.0, 100.0, false, false);
        assert!(!d.can_handle);
        assert!(d.reason.unwrap().contains("x:9"));
    }

    #[test]
    fn llm_busy_normal_priority_pins_score_30() {
        // avg 12000 (−20), busy (−40) would leave 40, but normal priority
        // while busy pins the score to 30.
        let d = score_llm(true, true, Some("a:1"), 12_000.0, 100.0, true, false);
        assert!(d.can_handle);
        assert_eq!(d.score, 30);
        assert_eq!(d.estimated_wait_ms, Some(12_000));
    }

    #[test]
    fn llm_busy_high_priority_keeps_deducted_score() {
        let d = score_llm(true, true, Some("a:1"), 12_000.0, 100.0, true, true);
        assert!(d.can_handle);
        assert_eq!(d.score, 40);
        assert_eq!(d.estimated_wait_ms, Some(12_000));
    }

    #[test]
    fn llm_flaky_and_slow_stacks_deductions() {
        let d = score_llm(true, true, None, 15_000.0, 80.0, false, false);
        assert!(d.can_handle);
        assert_eq!(d.score, 50); // 100 − 20 − 30
    }

    #[test]
    fn llm_busy_high_priority_with_every_deduction() {
        let d = score_llm(true, true, None, 15_000.0, 80.0, true, true);
        assert_eq!(d.score, 10); // 100 − 20 − 30 − 40
    }

    // -----------------------------------------------------------------------
    // RENDER scoring
    // -----------------------------------------------------------------------

    #[test]
    fn render_no_gpu_rejects() {
        let d = score_render(
            true, false, None, Some("wan2.2_14B_t2v"), Some(vec![]),
            0.0, 100.0, false, false,
        );
        assert!(!d.can_handle);
        assert_eq!(d.reason.as_deref(), Some("no GPU available"));
    }

    #[test]
    fn render_vram_full_rejects() {
        let d = score_render(
            true, true, Some(97.0), Some("wan2.2_14B_t2v"), Some(vec![]),
            0.0, 100.0, false, false,
        );
        assert!(!d.can_handle);
        assert_eq!(d.reason.as_deref(), Some("GPU memory full"));
    }

    #[test]
    fn render_unknown_workflow_rejects() {
        let d = score_render(
            true, true, Some(10.0), Some("nope"), None, 0.0, 100.0, false, false,
        );
        assert!(!d.can_handle);
        assert!(d.reason.unwrap().contains("unknown workflow"));
    }

    #[test]
    fn render_missing_models_rejects_with_names() {
        let d = score_render(
            true,
            true,
            Some(10.0),
            Some("wan2.2_14B_t2v"),
            Some(vec!["wan_2.1_vae.safetensors".to_string()]),
            0.0,
            100.0,
            false,
            false,
        );
        assert!(!d.can_handle);
        assert!(d.reason.unwrap().contains("wan_2.1_vae.safetensors"));
    }

    #[test]
    fn render_vram_pressure_deducts_20() {
        let d = score_render(
            true, true, Some(85.0), Some("wan2.2_14B_t2v"), Some(vec![]),
            0.0, 100.0, false, false,
        );
        assert!(d.can_handle);
        assert_eq!(d.score, 80);
    }

    #[test]
    fn render_busy_normal_priority_pins_score_30() {
        let d = score_render(
            true, true, Some(50.0), Some("wan2.2_14B_t2v"), Some(vec![]),
            60_000.0, 100.0, true, false,
        );
        assert!(d.can_handle);
        assert_eq!(d.score, 30);
        assert_eq!(d.estimated_wait_ms, Some(60_000));
    }

    #[test]
    fn render_idle_healthy_scores_100() {
        let d = score_render(
            true, true, Some(20.0), Some("wan2.2_14B_t2v"), Some(vec![]),
            0.0, 100.0, false, false,
        );
        assert_eq!(d.score, 100);
        assert!(d.reason.is_none());
    }
}
