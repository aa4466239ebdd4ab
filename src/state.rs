use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::api::error::AgentError;
use crate::comlog::CommLog;
use crate::config::{AgentConfig, JOBS_HISTORY_SIZE};
use crate::hardware::HardwareSnapshot;
use crate::identity::NodeIdentity;
use crate::settings::SettingsStore;
use crate::stats::ServiceStats;
use crate::update::UpdateManager;

/// The two local services this agent sidecars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Llm,
    Render,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Llm => "llm",
            ServiceKind::Render => "render",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(ServiceKind::Llm),
            "render" => Ok(ServiceKind::Render),
            other => Err(AgentError::UnknownService(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Generate,
    Chat,
    Render,
}

/// A tracked in-flight request. At most one per service; a second tracked
/// inbound overwrites the slot without back-pressure.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_nodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// A finished job as kept in the bounded history ring.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub service: ServiceKind,
    #[serde(flatten)]
    pub job: Job,
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

/// Mutable view of one local service: availability, observed catalog, and
/// the single-slot current job.
#[derive(Debug, Default)]
pub struct ServiceStatus {
    pub available: bool,
    /// LLM tag list (empty for RENDER).
    pub models: Vec<String>,
    /// RENDER slot → observed model file names (empty for LLM).
    pub catalog: BTreeMap<String, BTreeSet<String>>,
    pub current_job: Option<Job>,
    pub jobs_completed: u64,
}

/// One sidecarred service: fixed port plus guarded status and stats.
#[derive(Debug)]
pub struct ServiceHandle {
    pub kind: ServiceKind,
    pub port: u16,
    pub status: RwLock<ServiceStatus>,
    pub stats: Mutex<ServiceStats>,
}

impl ServiceHandle {
    fn new(kind: ServiceKind, port: u16) -> Self {
        Self {
            kind,
            port,
            status: RwLock::new(ServiceStatus::default()),
            stats: Mutex::new(ServiceStats::new()),
        }
    }

    /// Upstream base URL on the loopback interface.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Shared application state handed to every handler and background task.
pub struct AgentState {
    pub config: AgentConfig,
    pub identity: NodeIdentity,
    pub client: reqwest::Client,
    pub llm: ServiceHandle,
    pub render: ServiceHandle,
    pub comlog: CommLog,
    pub settings: SettingsStore,
    pub updater: UpdateManager,
    pub jobs_history: Mutex<VecDeque<JobRecord>>,
    pub hardware: RwLock<Option<HardwareSnapshot>>,
    pub last_heartbeat: RwLock<Option<DateTime<Utc>>>,
}

impl AgentState {
    pub fn new(config: AgentConfig, identity: NodeIdentity) -> Arc<Self> {
        let client = reqwest::Client::new();
        let settings = SettingsStore::load(config.config_file());
        let updater = UpdateManager::new(&config, client.clone());

        Arc::new(Self {
            llm: ServiceHandle::new(ServiceKind::Llm, config.llm_port),
            render: ServiceHandle::new(ServiceKind::Render, config.render_port),
            comlog: CommLog::new(),
            settings,
            updater,
            jobs_history: Mutex::new(VecDeque::new()),
            hardware: RwLock::new(None),
            last_heartbeat: RwLock::new(None),
            client,
            identity,
            config,
        })
    }

    pub fn service(&self, kind: ServiceKind) -> &ServiceHandle {
        match kind {
            ServiceKind::Llm => &self.llm,
            ServiceKind::Render => &self.render,
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.identity.started_at).num_seconds().max(0)
    }

    /// Occupy the service's job slot. An in-flight job is overwritten and
    /// never reaches the history ring.
    pub async fn begin_job(&self, kind: ServiceKind, job: Job) {
        let mut status = self.service(kind).status.write().await;
        status.current_job = Some(job);
    }

    /// Clear the job slot and account the terminal state. The slot is
    /// cleared before `jobs_completed` is incremented.
    pub async fn finish_job(&self, kind: ServiceKind, terminal_status: &str) -> Option<JobRecord> {
        let job = {
            let mut status = self.service(kind).status.write().await;
            let job = status.current_job.take()?;
            status.jobs_completed += 1;
            job
        };

        let record = JobRecord {
            service: kind,
            job,
            status: terminal_status.to_string(),
            completed_at: Utc::now(),
        };

        let mut history = self.jobs_history.lock().await;
        history.push_front(record.clone());
        history.truncate(JOBS_HISTORY_SIZE);
        Some(record)
    }

    /// Record a completed proxy call in the service's stats.
    pub async fn record_request(
        &self,
        kind: ServiceKind,
        duration_ms: u64,
        success: bool,
        error: Option<&str>,
        tokens: u64,
    ) {
        let mut stats = self.service(kind).stats.lock().await;
        stats.record(duration_ms, success, error, tokens);
    }

    /// Union of all RENDER slot lists — the set readiness checks run against.
    pub async fn render_catalog_flat(&self) -> BTreeSet<String> {
        let status = self.render.status.read().await;
        status.catalog.values().flatten().cloned().collect()
    }
}
