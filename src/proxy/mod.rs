pub mod streaming;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::api::error::{upstream_error, AgentError};
use crate::comlog::prompt_preview;
use crate::state::{AgentState, Job, JobType, ServiceKind};
use streaming::{CompletionHook, TelemetryStream};

/// Generation calls can run for minutes; everything else fails fast.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on buffered request bodies (image uploads to RENDER).
const MAX_PROXY_BODY: usize = 256 * 1024 * 1024;

/// Hop-by-hop headers that must not be forwarded (RFC 2616 §13.5.1), plus
/// host, which reqwest derives from the upstream URL.
const SKIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Response headers preserved verbatim on pass-through paths.
const KEEP_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-disposition",
    "content-length",
    "transfer-encoding",
    "cache-control",
];

/// ANY /proxy/llm/{*path} — forward to the local LLM service.
pub async fn llm_proxy(
    State(state): State<Arc<AgentState>>,
    Path(path): Path<String>,
    req: Request,
) -> Response<Body> {
    forward(state, ServiceKind::Llm, path, req).await
}

/// ANY /proxy/render/{*path} — forward to the local RENDER service.
pub async fn render_proxy(
    State(state): State<Arc<AgentState>>,
    Path(path): Path<String>,
    req: Request,
) -> Response<Body> {
    forward(state, ServiceKind::Render, path, req).await
}

/// The proxy core: forward a request to the service's loopback port,
/// streaming large responses through untouched while extracting telemetry.
/// This is the only code path that updates request stats.
async fn forward(
    state: Arc<AgentState>,
    kind: ServiceKind,
    subpath: String,
    req: Request,
) -> Response<Body> {
    let method = req.method().clone();
    let headers = req.headers().clone();
    let query = req.uri().query().map(str::to_string);

    let body_bytes = match axum::body::to_bytes(req.into_body(), MAX_PROXY_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AgentError::MalformedRequest(format!("failed to read request body: {e}"))
                .into_response();
        }
    };

    // Non-destructive sniff: job tracking and log summaries only. Opaque
    // bodies are forwarded verbatim.
    let parsed: Option<Value> = serde_json::from_slice(&body_bytes).ok();
    let endpoint = format!("/{subpath}");

    state.comlog.log_send(kind, &endpoint, parsed.as_ref()).await;

    let tracked = is_tracked(kind, &subpath);
    if tracked {
        state
            .begin_job(kind, build_job(kind, &subpath, parsed.as_ref()))
            .await;
    }

    let timeout = if tracked && kind == ServiceKind::Llm {
        GENERATION_TIMEOUT
    } else {
        DEFAULT_TIMEOUT
    };

    let mut url = format!("{}/{}", state.service(kind).base_url(), subpath);
    if let Some(query) = query {
        url.push('?');
        url.push_str(&query);
    }

    let mut upstream = state.client.request(method, &url).timeout(timeout);
    for (name, value) in headers.iter() {
        if !SKIP_REQUEST_HEADERS.contains(&name.as_str()) {
            upstream = upstream.header(name, value);
        }
    }
    if !body_bytes.is_empty() {
        upstream = upstream.body(body_bytes);
    }

    let started = Instant::now();

    // If the client disconnects before the upstream responds, this handler
    // future is dropped and the guard settles the accounting as canceled.
    let mut guard = CancelGuard {
        state: state.clone(),
        kind,
        endpoint: endpoint.clone(),
        tracked,
        started,
        armed: true,
    };

    let resp = match upstream.send().await {
        Ok(resp) => resp,
        Err(e) => {
            guard.armed = false;
            let err = upstream_error(&e);
            settle(
                &state, kind, &endpoint, tracked, started, None, None,
                Some(err.to_string()),
            )
            .await;
            return err.into_response();
        }
    };

    let status = resp.status();
    let upstream_ok = status.is_success();
    let resp_headers = resp.headers().clone();

    let chunked = resp_headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let is_streaming = chunked || subpath.contains("stream");

    let content_type = resp_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let is_binary = content_type.starts_with("image/")
        || content_type.starts_with("video/")
        || content_type.starts_with("audio/")
        || content_type.starts_with("application/octet-stream");

    if is_streaming || is_binary {
        // Pass bytes through chunk-by-chunk; accounting fires when the
        // stream terminates (or the client walks away).
        guard.armed = false;
        let hook = CompletionHook {
            state: state.clone(),
            kind,
            endpoint,
            tracked,
            started,
            status: status.as_u16(),
            upstream_ok,
        };
        let count_tokens = kind == ServiceKind::Llm && !is_binary;
        let stream = TelemetryStream::new(resp.bytes_stream().boxed(), count_tokens, hook);

        debug!(service = kind.as_str(), path = %subpath, binary = is_binary, "Streaming proxy response");
        let mut builder = Response::builder().status(status);
        copy_response_headers(&mut builder, &resp_headers);
        return builder
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    // Buffered JSON/text path.
    match resp.bytes().await {
        Ok(bytes) => {
            guard.armed = false;
            let error_label =
                (!upstream_ok).then(|| AgentError::UpstreamBadStatus(status.as_u16()).to_string());
            let parsed_resp: Option<Value> = serde_json::from_slice(&bytes).ok();
            settle(
                &state,
                kind,
                &endpoint,
                tracked,
                started,
                Some(status.as_u16()),
                parsed_resp.as_ref(),
                error_label,
            )
            .await;

            let mut builder = Response::builder().status(status);
            copy_response_headers(&mut builder, &resp_headers);
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            guard.armed = false;
            let err = upstream_error(&e);
            settle(
                &state,
                kind,
                &endpoint,
                tracked,
                started,
                Some(status.as_u16()),
                None,
                Some(err.to_string()),
            )
            .await;
            err.into_response()
        }
    }
}

/// Record stats, append the receive log entry, and settle the job slot.
#[allow(clippy::too_many_arguments)]
async fn settle(
    state: &Arc<AgentState>,
    kind: ServiceKind,
    endpoint: &str,
    tracked: bool,
    started: Instant,
    status: Option<u16>,
    response: Option<&Value>,
    error: Option<String>,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    let success = error.is_none();

    state
        .record_request(kind, duration_ms, success, error.as_deref(), 0)
        .await;
    state
        .comlog
        .log_receive(kind, endpoint, status, Some(duration_ms), response, error.as_deref())
        .await;
    if tracked {
        let terminal = if success { "completed" } else { "failed" };
        state.finish_job(kind, terminal).await;
    }
}

/// Settles accounting when the handler future is dropped mid-flight
/// (client disconnect or timeout on the agent's own listener).
struct CancelGuard {
    state: Arc<AgentState>,
    kind: ServiceKind,
    endpoint: String,
    tracked: bool,
    started: Instant,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let state = self.state.clone();
        let kind = self.kind;
        let endpoint = std::mem::take(&mut self.endpoint);
        let tracked = self.tracked;
        let duration_ms = self.started.elapsed().as_millis() as u64;
        tokio::spawn(async move {
            let canceled = AgentError::ClientCanceled.to_string();
            state
                .record_request(kind, duration_ms, false, Some(canceled.as_str()), 0)
                .await;
            state
                .comlog
                .log_receive(
                    kind,
                    &endpoint,
                    None,
                    Some(duration_ms),
                    None,
                    Some(canceled.as_str()),
                )
                .await;
            if tracked {
                state.finish_job(kind, "canceled").await;
            }
        });
    }
}

/// Generation-style calls occupy the service's job slot; everything else
/// (tag lists, queue polls, file views) passes through untracked.
fn is_tracked(kind: ServiceKind, subpath: &str) -> bool {
    match kind {
        ServiceKind::Llm => subpath.contains("generate") || subpath.contains("chat"),
        ServiceKind::Render => subpath.trim_matches('/') == "prompt",
    }
}

fn build_job(kind: ServiceKind, subpath: &str, parsed: Option<&Value>) -> Job {
    let map = parsed.and_then(Value::as_object);

    let (job_type, workflow_nodes) = match kind {
        ServiceKind::Llm if subpath.contains("chat") => (JobType::Chat, None),
        ServiceKind::Llm => (JobType::Generate, None),
        ServiceKind::Render => {
            let nodes = map
                .and_then(|m| m.get("prompt"))
                .and_then(Value::as_object)
                .map(|graph| graph.len());
            (JobType::Render, nodes)
        }
    };

    Job {
        id: None,
        job_type,
        model: map
            .and_then(|m| m.get("model"))
            .and_then(Value::as_str)
            .map(str::to_string),
        workflow_nodes,
        prompt_preview: map.and_then(prompt_preview),
        started_at: Utc::now(),
    }
}

fn copy_response_headers(
    builder: &mut axum::http::response::Builder,
    upstream: &HeaderMap,
) {
    for name in KEEP_RESPONSE_HEADERS {
        if let Some(value) = upstream.get(*name) {
            if let Some(headers) = builder.headers_mut() {
                if let Ok(header_name) = name.parse::<axum::http::HeaderName>() {
                    headers.insert(header_name, value.clone());
                }
            }
        }
    }
}
