use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::MAX_LOG_ENTRIES;
use crate::state::ServiceKind;

/// Strings longer than this are truncated in summaries.
const MAX_SUMMARY_LEN: usize = 500;

/// Prompt previews preserve roughly this many characters.
const PROMPT_PREVIEW_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

/// One structured request/response record. Payloads are summarised at append
/// time so the ring never retains large bodies.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data_summary: String,
    pub response_summary: String,
}

/// Bounded in-memory rings of communication records, one per service.
///
/// The log is a debugging aid: appends are O(1) and never block the proxy
/// hot path on anything but the ring's own mutex.
#[derive(Debug, Default)]
pub struct CommLog {
    llm: Mutex<VecDeque<LogEntry>>,
    render: Mutex<VecDeque<LogEntry>>,
    seq: AtomicU64,
}

impl CommLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outbound request to a local service.
    pub async fn log_send(&self, service: ServiceKind, endpoint: &str, payload: Option<&Value>) {
        let entry = LogEntry {
            id: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            direction: Direction::Send,
            endpoint: endpoint.to_string(),
            status_code: None,
            duration_ms: None,
            error: None,
            data_summary: summarize(payload),
            response_summary: "null".to_string(),
        };
        self.push(service, entry).await;
    }

    /// Record the completion of a request to a local service.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_receive(
        &self,
        service: ServiceKind,
        endpoint: &str,
        status_code: Option<u16>,
        duration_ms: Option<u64>,
        response: Option<&Value>,
        error: Option<&str>,
    ) {
        let entry = LogEntry {
            id: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            direction: Direction::Receive,
            endpoint: endpoint.to_string(),
            status_code,
            duration_ms,
            error: error.map(|e| truncate(e, MAX_SUMMARY_LEN)),
            data_summary: "null".to_string(),
            response_summary: summarize(response),
        };
        self.push(service, entry).await;
    }

    /// Newest-first snapshot of one service's ring.
    pub async fn entries(&self, service: ServiceKind) -> Vec<LogEntry> {
        self.ring(service).lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self, service: ServiceKind) {
        self.ring(service).lock().await.clear();
    }

    async fn push(&self, service: ServiceKind, entry: LogEntry) {
        let mut ring = self.ring(service).lock().await;
        ring.push_front(entry);
        ring.truncate(MAX_LOG_ENTRIES);
    }

    fn ring(&self, service: ServiceKind) -> &Mutex<VecDeque<LogEntry>> {
        match service {
            ServiceKind::Llm => &self.llm,
            ServiceKind::Render => &self.render,
        }
    }
}

/// Reduce an arbitrary payload to a short human-readable summary.
///
/// Workflow submissions collapse to a node count, generation requests keep
/// the model name and a prompt preview, collections collapse to a length,
/// and everything else is stringified and truncated.
pub fn summarize(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "null".to_string();
    };

    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => truncate(s, MAX_SUMMARY_LEN),
        Value::Array(items) => format!("[List with {} items]", items.len()),
        Value::Object(map) => {
            if let Some(Value::Object(graph)) = map.get("prompt") {
                return format!("[Workflow with {} nodes]", graph.len());
            }
            if let Some(model) = map.get("model").and_then(Value::as_str) {
                let preview = prompt_preview(map).unwrap_or_default();
                return format!("model={model}, prompt={preview}...");
            }
            truncate(&value.to_string(), MAX_SUMMARY_LEN)
        }
        other => truncate(&other.to_string(), MAX_SUMMARY_LEN),
    }
}

/// First ~100 chars of a request's prompt text, from either a `prompt` string
/// or the first entry of a `messages` array.
pub fn prompt_preview(map: &serde_json::Map<String, Value>) -> Option<String> {
    if let Some(prompt) = map.get("prompt").and_then(Value::as_str) {
        return Some(truncate(prompt, PROMPT_PREVIEW_LEN));
    }
    if let Some(messages) = map.get("messages").and_then(Value::as_array) {
        let content = messages.first()?.get("content")?.as_str()?;
        return Some(truncate(content, PROMPT_PREVIEW_LEN));
    }
    None
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}
