use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

/// All recoverable failure modes of the agent. None of these abort the
/// process; the only intentional exit is re-exec after a successful update.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("upstream returned {0}")]
    UpstreamBadStatus(u16),

    #[error("canceled")]
    ClientCanceled,

    #[error("failed to persist config: {0}")]
    ConfigWriteFailed(String),

    #[error("update check failed: {0}")]
    UpdateCheckFailed(String),

    #[error("update download failed: {0}")]
    UpdateDownloadFailed(String),

    #[error("update verification failed: {0}")]
    UpdateVerifyFailed(String),

    #[error("update apply failed: {0}")]
    UpdateApplyFailed(String),

    #[error("heartbeat failed: {0}")]
    HeartbeatFailed(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("unknown service: {0}")]
    UnknownService(String),
}

impl AgentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::MalformedRequest(_) | AgentError::UnknownService(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentError::UnknownWorkflow(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Map a reqwest failure onto the agent's upstream error kinds.
pub fn upstream_error(err: &reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::UpstreamTimeout(err.to_string())
    } else {
        AgentError::UpstreamUnreachable(err.to_string())
    }
}
