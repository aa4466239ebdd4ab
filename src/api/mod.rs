pub mod capacity;
pub mod error;
pub mod jobs;
pub mod models;
pub mod status;
pub mod update;
pub mod workflows;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;

use crate::proxy;
use crate::state::AgentState;

/// The agent's full HTTP surface: introspection, mutation, workflow, and
/// proxy routes. CORS and tracing layers are applied by the caller.
pub fn routes(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/status", get(status::full_status))
        .route("/version", get(status::version))
        .route("/health", get(status::health))
        .route("/hardware", get(status::hardware))
        .route("/stats", get(status::stats))
        .route("/stats/reset", post(status::reset_stats))
        .route("/capabilities", get(capacity::capabilities))
        .route("/load-balance-info", get(capacity::load_balance_info))
        .route("/can-handle", post(capacity::can_handle))
        .route("/workflows", get(workflows::list))
        .route("/workflows/availability", get(workflows::availability_all))
        .route("/workflows/{id}", get(workflows::detail))
        .route("/workflows/{id}/download", get(workflows::download))
        .route("/workflows/{id}/availability", get(workflows::availability))
        .route("/models/config", get(models::config))
        .route("/models/toggle", post(models::toggle))
        .route("/models/set-enabled", post(models::set_enabled))
        .route("/job/start", post(jobs::start))
        .route("/job/complete", post(jobs::complete))
        .route("/jobs/history", get(jobs::history))
        .route("/logs", get(jobs::logs_all))
        .route("/logs/{service}", get(jobs::logs_service))
        .route("/logs/{service}/clear", post(jobs::logs_clear))
        .route("/update/check", get(update::check))
        .route("/update/apply", post(update::apply))
        .route("/proxy/llm/{*path}", any(proxy::llm_proxy))
        .route("/proxy/render/{*path}", any(proxy::render_proxy))
        .with_state(state)
}
