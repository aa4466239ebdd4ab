//! HTTP-surface tests.
//!
//! These drive the real router with `tower::ServiceExt::oneshot`, covering
//! the introspection endpoints, the model-visibility round trip, workflow
//! readiness against a seeded catalog, and the can-handle scoring rules —
//! including the busy/priority interaction the orchestrator's balancer
//! depends on.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::api;
use crate::hardware::{CpuInfo, DiskInfo, GpuInfo, HardwareSnapshot, MemoryInfo};
use crate::state::test_support::test_state;
use crate::state::{AgentState, Job, JobType, ServiceKind};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn router(state: Arc<AgentState>) -> Router {
    api::routes(state)
}

async fn get_json(router: &Router, path: &str) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(
            Request::post(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn test_gpu(total_mb: u64, used_mb: u64) -> GpuInfo {
    GpuInfo {
        index: 0,
        name: "NVIDIA GeForce RTX 4090".into(),
        driver: "555.42".into(),
        vram_total_mb: total_mb,
        vram_used_mb: used_mb,
        vram_free_mb: total_mb - used_mb,
        utilization_gpu_percent: Some(0),
        utilization_mem_percent: Some(0),
        temperature_c: Some(40),
        power_w: Some(80.0),
        power_limit_w: Some(450.0),
        pstate: Some("P8".into()),
    }
}

fn test_hardware(gpus: Vec<GpuInfo>) -> HardwareSnapshot {
    HardwareSnapshot {
        cpu: CpuInfo {
            model: "Test CPU".into(),
            physical_cores: 8,
            logical_cores: 16,
            frequency_mhz: 3600,
        },
        memory: MemoryInfo {
            total_mb: 65536,
            available_mb: 32768,
            used_mb: 32768,
            swap_total_mb: 8192,
            swap_used_mb: 0,
        },
        gpus,
        disk: Some(DiskInfo {
            total_bytes: 1_000_000_000_000,
            used_bytes: 400_000_000_000,
            free_bytes: 600_000_000_000,
        }),
        collected_at: Utc::now(),
    }
}

async fn seed_llm(state: &Arc<AgentState>, models: &[&str]) {
    let mut status = state.llm.status.write().await;
    status.available = true;
    status.models = models.iter().map(|m| m.to_string()).collect();
}

async fn seed_render_catalog(state: &Arc<AgentState>, slots: &[(&str, &[&str])]) {
    let mut status = state.render.status.write().await;
    status.available = true;
    for (slot, files) in slots {
        status.catalog.insert(
            slot.to_string(),
            files.iter().map(|f| f.to_string()).collect::<BTreeSet<_>>(),
        );
    }
}

fn busy_job() -> Job {
    Job {
        id: None,
        job_type: JobType::Generate,
        model: Some("a:1".into()),
        workflow_nodes: None,
        prompt_preview: None,
        started_at: Utc::now(),
    }
}

/// The observed catalog from the wan2.2 deployment this agent targets.
const WAN_CATALOG: &[(&str, &[&str])] = &[
    (
        "unet",
        &[
            "wan2.2_t2v_high_noise_14B_fp8_scaled.safetensors",
            "wan2.2_t2v_low_noise_14B_fp8_scaled.safetensors",
        ],
    ),
    ("vae", &["wan_2.1_vae.safetensors"]),
    ("clip", &["umt5_xxl_fp8_e4m3fn_scaled.safetensors"]),
    (
        "lora",
        &[
            "wan2.2_t2v_lightx2v_4steps_lora_v1.1_high_noise.safetensors",
            "wan2.2_t2v_lightx2v_4steps_lora_v1.1_low_noise.safetensors",
        ],
    ),
];

// ---------------------------------------------------------------------------
// Introspection endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_node_and_services() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state.clone());

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["node_id"], json!(state.identity.node_id));
    assert_eq!(body["llm"], json!(false));
    assert_eq!(body["render"], json!(false));
}

#[tokio::test]
async fn version_exposes_hash_field() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state);

    let (status, body) = get_json(&app, "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], json!(crate::config::AGENT_VERSION));
    // No executable at the test path — hash degrades to "unknown".
    assert_eq!(body["hash"], json!("unknown"));
}

#[tokio::test]
async fn status_returns_full_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1"]).await;
    let app = router(state);

    let (status, body) = get_json(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["llm"]["available"], json!(true));
    assert_eq!(body["services"]["llm"]["models"], json!(["a:1"]));
    assert!(body["uptime_seconds"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn stats_reset_then_single_record() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state.clone());

    state.record_request(ServiceKind::Llm, 999, false, Some("x"), 0).await;
    let (status, body) = post_json(&app, "/stats/reset", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    state.record_request(ServiceKind::Llm, 42, true, None, 0).await;
    let (_, body) = get_json(&app, "/stats").await;
    assert_eq!(body["llm"]["total_requests"], json!(1));
    assert_eq!(body["llm"]["successful_requests"], json!(1));
    assert_eq!(body["llm"]["avg_response_time_ms"], json!(42.0));
    assert_eq!(body["llm"]["min_response_time_ms"], json!(42));
    assert_eq!(body["llm"]["max_response_time_ms"], json!(42));
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workflows_list_and_detail() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state);

    let (status, body) = get_json(&app, "/workflows").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["workflows"]["wan2.2_14B_t2v"].is_object());
    assert!(body["workflows"]["wan2.2_14B_i2v"].is_object());

    let (status, body) = get_json(&app, "/workflows/wan2.2_14B_t2v").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "wan2.2_14B_t2v");
    assert!(body["graph"].is_object());

    let (status, body) = get_json(&app, "/workflows/unknown_wf").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("unknown_wf"));
}

#[tokio::test]
async fn workflow_download_matches_registry_graph() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(
            Request::get("/workflows/wan2.2_14B_t2v/download")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=wan2.2_14B_t2v_api.json");

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let downloaded: Value = serde_json::from_slice(&bytes).unwrap();
    let spec = crate::workflows::find("wan2.2_14B_t2v").unwrap();
    assert_eq!(downloaded, spec.graph);
}

#[tokio::test]
async fn wan_t2v_ready_against_observed_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_render_catalog(&state, WAN_CATALOG).await;
    let app = router(state);

    let (status, body) = get_json(&app, "/workflows/wan2.2_14B_t2v/availability").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["all_available"], json!(true));

    // The i2v pipeline needs different diffusion units, so it stays not-ready.
    let (_, body) = get_json(&app, "/workflows/availability").await;
    assert_eq!(body["wan2.2_14B_t2v"]["all_available"], json!(true));
    assert_eq!(body["wan2.2_14B_i2v"]["all_available"], json!(false));
}

// ---------------------------------------------------------------------------
// Model visibility
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_toggle_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1", "b:2", "c:3"]).await;
    let app = router(state);

    let (status, body) = post_json(&app, "/models/toggle", json!({"model": "b:2"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], json!(false));

    let (_, body) = get_json(&app, "/models/config").await;
    assert_eq!(body["advertised"], json!(["a:1", "c:3"]));
    assert_eq!(body["all_models"], json!(["a:1", "b:2", "c:3"]));
    assert_eq!(body["disabled"], json!(["b:2"]));

    // Second flip restores the prior state.
    let (_, body) = post_json(&app, "/models/toggle", json!({"model": "b:2"})).await;
    assert_eq!(body["enabled"], json!(true));
    let (_, body) = get_json(&app, "/models/config").await;
    assert_eq!(body["disabled"], json!([]));
}

#[tokio::test]
async fn model_bulk_set_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1", "b:2"]).await;
    let app = router(state);

    let (status, _) = post_json(
        &app,
        "/models/set-enabled",
        json!({"models": {"a:1": false, "b:2": true}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get_json(&app, "/models/config").await;
    assert_eq!(body["advertised"], json!(["b:2"]));
}

// ---------------------------------------------------------------------------
// Can-handle scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn can_handle_llm_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state);

    let (status, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "llm", "model": "X"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_handle"], json!(false));
    assert!(body["reason"].as_str().unwrap().contains("unavailable"));
    assert_eq!(body["score"], json!(0));
}

#[tokio::test]
async fn can_handle_llm_busy_slow_normal_priority() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1"]).await;
    state.begin_job(ServiceKind::Llm, busy_job()).await;
    state.record_request(ServiceKind::Llm, 12_000, true, None, 0).await;
    let app = router(state);

    let (status, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "llm", "model": "a:1", "priority": "normal"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_handle"], json!(true));
    assert_eq!(body["score"], json!(30));
    assert_eq!(body["estimated_wait_ms"], json!(12_000));
}

#[tokio::test]
async fn can_handle_llm_busy_slow_high_priority() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1"]).await;
    state.begin_job(ServiceKind::Llm, busy_job()).await;
    state.record_request(ServiceKind::Llm, 12_000, true, None, 0).await;
    let app = router(state);

    let (_, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "llm", "model": "a:1", "priority": "high"}),
    )
    .await;
    assert_eq!(body["can_handle"], json!(true));
    assert_eq!(body["score"], json!(40));
    assert_eq!(body["estimated_wait_ms"], json!(12_000));
}

#[tokio::test]
async fn can_handle_llm_disabled_model_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1", "b:2"]).await;
    state.settings.toggle_model("b:2", Some(false)).await.unwrap();
    let app = router(state);

    let (_, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "llm", "model": "b:2"}),
    )
    .await;
    assert_eq!(body["can_handle"], json!(false));
    assert!(body["reason"].as_str().unwrap().contains("b:2"));
}

#[tokio::test]
async fn can_handle_render_vram_full() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_render_catalog(&state, WAN_CATALOG).await;
    *state.hardware.write().await = Some(test_hardware(vec![test_gpu(24_000, 23_000)]));
    let app = router(state);

    let (_, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "render", "workflow_id": "wan2.2_14B_t2v"}),
    )
    .await;
    assert_eq!(body["can_handle"], json!(false));
    assert_eq!(body["reason"], json!("GPU memory full"));
}

#[tokio::test]
async fn can_handle_render_healthy_idle() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_render_catalog(&state, WAN_CATALOG).await;
    *state.hardware.write().await = Some(test_hardware(vec![test_gpu(24_000, 4_000)]));
    let app = router(state);

    let (_, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "render", "workflow_id": "wan2.2_14B_t2v"}),
    )
    .await;
    assert_eq!(body["can_handle"], json!(true));
    assert_eq!(body["score"], json!(100));
}

#[tokio::test]
async fn can_handle_render_no_gpu() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_render_catalog(&state, WAN_CATALOG).await;
    *state.hardware.write().await = Some(test_hardware(vec![]));
    let app = router(state);

    let (_, body) = post_json(
        &app,
        "/can-handle",
        json!({"job_type": "render", "workflow_id": "wan2.2_14B_t2v"}),
    )
    .await;
    assert_eq!(body["can_handle"], json!(false));
    assert_eq!(body["reason"], json!("no GPU available"));
}

#[tokio::test]
async fn can_handle_unknown_service_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state);

    let (status, body) = post_json(&app, "/can-handle", json!({"job_type": "ollama"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ollama"));
}

// ---------------------------------------------------------------------------
// Jobs and logs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_job_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = router(state.clone());

    let (status, _) = post_json(
        &app,
        "/job/start",
        json!({"service": "render", "job_id": "r-1", "workflow": "wan2.2_14B_t2v"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.render.status.read().await.current_job.is_some());

    let (_, body) = post_json(&app, "/job/complete", json!({"service": "render"})).await;
    assert_eq!(body["recorded"], json!(true));
    assert!(state.render.status.read().await.current_job.is_none());

    let (_, body) = get_json(&app, "/jobs/history").await;
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], json!("r-1"));
    assert_eq!(jobs[0]["status"], json!("completed"));
}

#[tokio::test]
async fn logs_endpoints_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    state.comlog.log_send(ServiceKind::Llm, "/api/tags", None).await;
    let app = router(state);

    let (_, body) = get_json(&app, "/logs").await;
    assert_eq!(body["llm"].as_array().unwrap().len(), 1);
    assert_eq!(body["render"].as_array().unwrap().len(), 0);

    let (_, body) = get_json(&app, "/logs/llm").await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);

    let (status, _) = post_json(&app, "/logs/llm/clear", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get_json(&app, "/logs/llm").await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 0);

    let (status, _) = get_json(&app, "/logs/nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capabilities_filters_models_and_reports_ready() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1", "b:2", "c:3"]).await;
    seed_render_catalog(&state, WAN_CATALOG).await;
    state.settings.toggle_model("b:2", Some(false)).await.unwrap();
    let app = router(state);

    let (status, body) = get_json(&app, "/capabilities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["llm"]["models"], json!(["a:1", "c:3"]));
    assert_eq!(
        body["services"]["llm"]["all_models"],
        json!(["a:1", "b:2", "c:3"])
    );
    let ready = body["workflows"]["ready"].as_array().unwrap();
    assert!(ready.contains(&json!("wan2.2_14B_t2v")));
    assert!(!ready.contains(&json!("wan2.2_14B_i2v")));
}

#[tokio::test]
async fn load_balance_info_is_compact() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    seed_llm(&state, &["a:1"]).await;
    state.record_request(ServiceKind::Llm, 100, true, None, 0).await;
    let app = router(state);

    let (status, body) = get_json(&app, "/load-balance-info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["llm"]["available"], json!(true));
    assert_eq!(body["llm"]["busy"], json!(false));
    assert_eq!(body["llm"]["avg_response_time_ms"], json!(100.0));
    assert_eq!(body["llm"]["requests_per_minute"], json!(1));
}
