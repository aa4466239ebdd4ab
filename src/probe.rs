use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::hardware;
use crate::state::{AgentState, ServiceKind};

/// Timeout for the LLM tag-list request.
const LLM_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the RENDER liveness endpoints.
const RENDER_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for the (large) RENDER object-info catalog.
const OBJECT_INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// Loader node → (input parameter, catalog slot). The candidate lists under
/// these well-known nodes are the service's observable model catalog.
const LOADER_NODES: &[(&str, &str, &str)] = &[
    ("CheckpointLoaderSimple", "ckpt_name", "checkpoint"),
    ("VAELoader", "vae_name", "vae"),
    ("CLIPLoader", "clip_name", "clip"),
    ("LoraLoader", "lora_name", "lora"),
    ("LoraLoaderModelOnly", "lora_name", "lora"),
    ("UNETLoader", "unet_name", "unet"),
];

/// One probe cycle: refresh both services and the hardware inventory.
pub async fn run_cycle(state: &Arc<AgentState>) {
    probe_llm(state).await;
    probe_render(state).await;

    let snapshot = hardware::collect().await;
    *state.hardware.write().await = Some(snapshot);
}

/// Poll the LLM tag list. A failed probe flips availability off but keeps
/// the last known catalog; the next success replaces it wholesale.
async fn probe_llm(state: &Arc<AgentState>) {
    let url = format!("{}/api/tags", state.llm.base_url());
    state.comlog.log_send(ServiceKind::Llm, "/api/tags", None).await;

    let start = Instant::now();
    let result = state
        .client
        .get(&url)
        .timeout(LLM_PROBE_TIMEOUT)
        .send()
        .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(resp) if resp.status().is_success() => {
            let status = resp.status().as_u16();
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let models = parse_tags(&body);
            debug!(count = models.len(), "LLM probe succeeded");

            {
                let mut service = state.llm.status.write().await;
                service.available = true;
                service.models = models;
            }
            state
                .comlog
                .log_receive(
                    ServiceKind::Llm,
                    "/api/tags",
                    Some(status),
                    Some(duration_ms),
                    Some(&body),
                    None,
                )
                .await;
        }
        Ok(resp) => {
            mark_unavailable(state, ServiceKind::Llm).await;
            state
                .comlog
                .log_receive(
                    ServiceKind::Llm,
                    "/api/tags",
                    Some(resp.status().as_u16()),
                    Some(duration_ms),
                    None,
                    Some(&format!("unexpected status {}", resp.status())),
                )
                .await;
        }
        Err(e) => {
            mark_unavailable(state, ServiceKind::Llm).await;
            state
                .comlog
                .log_receive(
                    ServiceKind::Llm,
                    "/api/tags",
                    None,
                    Some(duration_ms),
                    None,
                    Some(&e.to_string()),
                )
                .await;
        }
    }
}

/// Poll RENDER liveness, then (when alive) refresh the model catalog from
/// `/object_info`.
async fn probe_render(state: &Arc<AgentState>) {
    let alive = render_is_alive(state).await;
    if !alive {
        mark_unavailable(state, ServiceKind::Render).await;
        return;
    }

    let url = format!("{}/object_info", state.render.base_url());
    state
        .comlog
        .log_send(ServiceKind::Render, "/object_info", None)
        .await;

    let start = Instant::now();
    let result = state
        .client
        .get(&url)
        .timeout(OBJECT_INFO_TIMEOUT)
        .send()
        .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(resp) if resp.status().is_success() => {
            let status = resp.status().as_u16();
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let catalog = parse_object_info(&body);
            debug!(slots = catalog.len(), "RENDER catalog refreshed");

            {
                let mut service = state.render.status.write().await;
                service.available = true;
                service.catalog = catalog;
            }
            state
                .comlog
                .log_receive(
                    ServiceKind::Render,
                    "/object_info",
                    Some(status),
                    Some(duration_ms),
                    None,
                    None,
                )
                .await;
        }
        Ok(resp) => {
            // Alive but the catalog endpoint misbehaved: stay available with
            // the previous catalog.
            warn!(status = %resp.status(), "RENDER object_info returned an error");
            let mut service = state.render.status.write().await;
            service.available = true;
        }
        Err(e) => {
            warn!(error = %e, "RENDER object_info failed");
            let mut service = state.render.status.write().await;
            service.available = true;
        }
    }
}

/// RENDER liveness: `/system_stats` first, `/queue` as the fallback.
async fn render_is_alive(state: &Arc<AgentState>) -> bool {
    for endpoint in ["/system_stats", "/queue"] {
        let url = format!("{}{}", state.render.base_url(), endpoint);
        state.comlog.log_send(ServiceKind::Render, endpoint, None).await;

        let start = Instant::now();
        let result = state
            .client
            .get(&url)
            .timeout(RENDER_PROBE_TIMEOUT)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(resp) if resp.status().is_success() => {
                state
                    .comlog
                    .log_receive(
                        ServiceKind::Render,
                        endpoint,
                        Some(resp.status().as_u16()),
                        Some(duration_ms),
                        None,
                        None,
                    )
                    .await;
                return true;
            }
            Ok(resp) => {
                state
                    .comlog
                    .log_receive(
                        ServiceKind::Render,
                        endpoint,
                        Some(resp.status().as_u16()),
                        Some(duration_ms),
                        None,
                        Some(&format!("unexpected status {}", resp.status())),
                    )
                    .await;
            }
            Err(e) => {
                state
                    .comlog
                    .log_receive(
                        ServiceKind::Render,
                        endpoint,
                        None,
                        Some(duration_ms),
                        None,
                        Some(&e.to_string()),
                    )
                    .await;
            }
        }
    }
    false
}

async fn mark_unavailable(state: &Arc<AgentState>, kind: ServiceKind) {
    let mut service = state.service(kind).status.write().await;
    if service.available {
        warn!(service = kind.as_str(), "Service became unavailable");
    }
    service.available = false;
}

/// Extract tag names from the LLM tag-list payload
/// (`{"models": [{"name": "..."}]}`).
fn parse_tags(body: &Value) -> Vec<String> {
    body.get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract the per-slot candidate lists from a RENDER `/object_info` payload.
/// The lists live at `<node>.input.required.<param>[0]`.
fn parse_object_info(body: &Value) -> BTreeMap<String, BTreeSet<String>> {
    let mut catalog: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (node, param, slot) in LOADER_NODES {
        let Some(candidates) = body
            .get(node)
            .and_then(|n| n.get("input"))
            .and_then(|i| i.get("required"))
            .and_then(|r| r.get(param))
            .and_then(Value::as_array)
            .and_then(|outer| outer.first())
            .and_then(Value::as_array)
        else {
            continue;
        };

        let entry = catalog.entry(slot.to_string()).or_default();
        entry.extend(
            candidates
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string),
        );
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_tags_extracts_names() {
        let body = json!({
            "models": [
                {"name": "llama3.1:8b", "size": 4920753328u64},
                {"name": "gpt-oss:20b"}
            ]
        });
        assert_eq!(parse_tags(&body), vec!["llama3.1:8b", "gpt-oss:20b"]);
    }

    #[test]
    fn parse_tags_tolerates_garbage() {
        assert!(parse_tags(&json!({})).is_empty());
        assert!(parse_tags(&json!({"models": "nope"})).is_empty());
        assert!(parse_tags(&Value::Null).is_empty());
    }

    #[test]
    fn parse_object_info_collects_slots() {
        let body = json!({
            "UNETLoader": {
                "input": {"required": {"unet_name": [["wan_high.safetensors", "wan_low.safetensors"], {}]}}
            },
            "VAELoader": {
                "input": {"required": {"vae_name": [["wan_vae.safetensors"]]}}
            },
            "LoraLoaderModelOnly": {
                "input": {"required": {"lora_name": [["a_lora.safetensors"], {}]}}
            },
            "SomeOtherNode": {
                "input": {"required": {"whatever": [[1, 2]]}}
            }
        });

        let catalog = parse_object_info(&body);
        assert_eq!(catalog["unet"].len(), 2);
        assert!(catalog["vae"].contains("wan_vae.safetensors"));
        assert!(catalog["lora"].contains("a_lora.safetensors"));
        assert!(!catalog.contains_key("checkpoint"));
    }

    #[test]
    fn parse_object_info_merges_both_lora_loaders() {
        let body = json!({
            "LoraLoader": {
                "input": {"required": {"lora_name": [["x.safetensors"]]}}
            },
            "LoraLoaderModelOnly": {
                "input": {"required": {"lora_name": [["y.safetensors"]]}}
            }
        });
        let catalog = parse_object_info(&body);
        assert_eq!(catalog["lora"].len(), 2);
    }
}
