use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::api::error::AgentError;

/// Per-node overrides persisted to `agent_config.json`.
///
/// Missing file or unknown fields are tolerated so old agents can be
/// upgraded in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedConfig {
    /// LLM model tags hidden from the orchestrator.
    #[serde(default)]
    pub llm_disabled_models: BTreeSet<String>,

    /// Workflow ids elided from capabilities and heartbeats.
    #[serde(default)]
    pub render_disabled_workflows: BTreeSet<String>,
}

/// In-memory mirror of the persisted config plus its on-disk location.
///
/// Mutations hold the write lock, update the mirror, then persist with a
/// write-temp-then-rename so a crash mid-write never leaves a torn file.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<PersistedConfig>,
}

impl SettingsStore {
    /// Load the store, falling back to empty sets when the file is absent
    /// or unreadable.
    pub fn load(path: PathBuf) -> Self {
        let config = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedConfig>(&bytes) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded agent configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed agent config, using defaults");
                    PersistedConfig::default()
                }
            },
            Err(_) => PersistedConfig::default(),
        };

        Self {
            path,
            inner: RwLock::new(config),
        }
    }

    pub async fn get(&self) -> PersistedConfig {
        self.inner.read().await.clone()
    }

    /// Enable or disable one LLM model; `enabled = None` flips the current
    /// state. Returns the new enabled state.
    pub async fn toggle_model(
        &self,
        model: &str,
        enabled: Option<bool>,
    ) -> Result<bool, AgentError> {
        let mut config = self.inner.write().await;
        let currently_enabled = !config.llm_disabled_models.contains(model);
        let target = enabled.unwrap_or(!currently_enabled);

        if target {
            config.llm_disabled_models.remove(model);
        } else {
            config.llm_disabled_models.insert(model.to_string());
        }

        persist(&self.path, &config)?;
        Ok(target)
    }

    /// Bulk-set model visibility from a name→enabled map.
    pub async fn set_models_enabled(
        &self,
        models: impl IntoIterator<Item = (String, bool)>,
    ) -> Result<(), AgentError> {
        let mut config = self.inner.write().await;
        for (model, enabled) in models {
            if enabled {
                config.llm_disabled_models.remove(&model);
            } else {
                config.llm_disabled_models.insert(model);
            }
        }
        persist(&self.path, &config)
    }

    /// Advertised view of the observed LLM models: observed minus disabled,
    /// preserving observation order.
    pub async fn filter_models(&self, observed: &[String]) -> Vec<String> {
        let config = self.inner.read().await;
        observed
            .iter()
            .filter(|m| !config.llm_disabled_models.contains(*m))
            .cloned()
            .collect()
    }

    pub async fn is_workflow_hidden(&self, id: &str) -> bool {
        self.inner.read().await.render_disabled_workflows.contains(id)
    }
}

/// Atomic write: serialize to a sibling temp file, then rename over the
/// destination.
fn persist(path: &Path, config: &PersistedConfig) -> Result<(), AgentError> {
    let payload = serde_json::to_vec_pretty(config)
        .map_err(|e| AgentError::ConfigWriteFailed(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, payload).map_err(|e| AgentError::ConfigWriteFailed(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        AgentError::ConfigWriteFailed(e.to_string())
    })?;
    Ok(())
}
