use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Agent version, used for update checking and heartbeats.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Probe + heartbeat cadence (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Run an update check every N heartbeats.
pub const UPDATE_CHECK_EVERY_N_HEARTBEATS: u64 = 25;

/// Maximum communication-log entries kept per service.
pub const MAX_LOG_ENTRIES: usize = 200;

/// Number of recent response times kept for the rolling average.
pub const STATS_HISTORY_SIZE: usize = 100;

/// Maximum completed jobs kept in history.
pub const JOBS_HISTORY_SIZE: usize = 50;

/// Persisted per-node configuration file, colocated with the executable.
pub const CONFIG_FILE_NAME: &str = "agent_config.json";

#[derive(Debug, Parser)]
#[command(name = "node-agent", version, about = "Distributed AI worker node agent")]
pub struct AgentArgs {
    /// Port the agent's HTTP surface listens on.
    #[arg(long, default_value_t = 8765)]
    pub port: u16,

    /// Orchestrator base URL (e.g. http://192.168.0.181:8001).
    /// Heartbeats and self-update are disabled when absent.
    #[arg(long)]
    pub server: Option<String>,

    /// Local LLM service port.
    #[arg(long = "llm-port", default_value_t = 11434)]
    pub llm_port: u16,

    /// Local RENDER service port.
    #[arg(long = "render-port", default_value_t = 8000)]
    pub render_port: u16,

    /// Skip the self-update check on startup.
    #[arg(long = "no-update")]
    pub no_update: bool,
}

/// Resolved runtime configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub server: Option<String>,
    pub llm_port: u16,
    pub render_port: u16,
    pub no_update: bool,

    /// Filesystem path of the running executable.
    pub exe_path: PathBuf,

    /// Directory holding `agent_config.json` and the identity fallback file.
    pub data_dir: PathBuf,
}

impl AgentConfig {
    pub fn from_args(args: AgentArgs) -> Result<Self> {
        let exe_path =
            std::env::current_exe().context("failed to resolve the agent executable path")?;
        let data_dir = exe_path
            .parent()
            .context("agent executable has no parent directory")?
            .to_path_buf();

        Ok(Self {
            port: args.port,
            server: args.server.map(|s| s.trim_end_matches('/').to_string()),
            llm_port: args.llm_port,
            render_port: args.render_port,
            no_update: args.no_update,
            exe_path,
            data_dir,
        })
    }

    /// Path of the persisted per-node configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Orchestrator endpoint URL, or None when no server is configured.
    pub fn server_url(&self, path: &str) -> Option<String> {
        self.server.as_ref().map(|base| format!("{base}{path}"))
    }
}
