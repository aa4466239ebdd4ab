use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;
use serde_json::Value;

use crate::api::error::AgentError;
use crate::state::{AgentState, ServiceKind};

/// Terminal accounting for one proxied response. Fired exactly once: on
/// stream end, on stream error, or (via Drop) when the client disconnects
/// mid-stream.
pub struct CompletionHook {
    pub state: Arc<AgentState>,
    pub kind: ServiceKind,
    pub endpoint: String,
    pub tracked: bool,
    pub started: Instant,
    pub status: u16,
    pub upstream_ok: bool,
}

impl CompletionHook {
    /// Record stats, log the receive entry, and settle the job slot.
    /// Spawned so it can run after the response future was dropped.
    pub fn fire(self, tokens: u64, error: Option<String>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let success = self.upstream_ok && error.is_none();
        let error_label = error.or_else(|| {
            (!self.upstream_ok).then(|| AgentError::UpstreamBadStatus(self.status).to_string())
        });

        tokio::spawn(async move {
            self.state
                .record_request(
                    self.kind,
                    duration_ms,
                    success,
                    error_label.as_deref(),
                    tokens,
                )
                .await;
            self.state
                .comlog
                .log_receive(
                    self.kind,
                    &self.endpoint,
                    Some(self.status),
                    Some(duration_ms),
                    None,
                    error_label.as_deref(),
                )
                .await;
            if self.tracked {
                let terminal = if success {
                    "completed"
                } else if error_label.as_deref() == Some("canceled") {
                    "canceled"
                } else {
                    "failed"
                };
                self.state.finish_job(self.kind, terminal).await;
            }
        });
    }
}

/// Pass-through byte stream that counts generated tokens on the side and
/// fires the completion hook at the stream's terminal state. Chunks are
/// never buffered; a chunk that fails to parse as JSON simply contributes
/// no tokens.
pub struct TelemetryStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    count_tokens: bool,
    tokens: u64,
    hook: Option<CompletionHook>,
}

impl TelemetryStream {
    pub fn new(
        inner: BoxStream<'static, reqwest::Result<Bytes>>,
        count_tokens: bool,
        hook: CompletionHook,
    ) -> Self {
        Self {
            inner,
            count_tokens,
            tokens: 0,
            hook: Some(hook),
        }
    }
}

impl Stream for TelemetryStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if this.count_tokens {
                    this.tokens += count_chunk_tokens(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(hook) = this.hook.take() {
                    hook.fire(this.tokens, Some(e.to_string()));
                }
                Poll::Ready(Some(Err(std::io::Error::other(e))))
            }
            Poll::Ready(None) => {
                if let Some(hook) = this.hook.take() {
                    hook.fire(this.tokens, None);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TelemetryStream {
    fn drop(&mut self) {
        // Client disconnected before the upstream finished.
        if let Some(hook) = self.hook.take() {
            hook.fire(self.tokens, Some(AgentError::ClientCanceled.to_string()));
        }
    }
}

/// Count the whitespace-separated words in each streamed JSON object's
/// `response` field. Chunks may carry several newline-delimited objects.
pub fn count_chunk_tokens(chunk: &[u8]) -> u64 {
    chunk
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_slice::<Value>(line).ok())
        .filter_map(|obj| {
            obj.get("response")
                .and_then(Value::as_str)
                .map(|text| text.split_whitespace().count() as u64)
        })
        .sum()
}
