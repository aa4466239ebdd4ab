use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;

use futures::StreamExt;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::api::error::AgentError;
use crate::config::AgentConfig;

/// Response header carrying the expected MD5 of the downloaded executable.
const HASH_HEADER: &str = "x-agent-hash";

/// Orchestrator's answer to `GET /agent/check?hash=`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    pub needs_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
}

/// Replaces the running executable with the orchestrator's build: check by
/// hash, stream the download to `<path>.new`, verify, swap with a backup,
/// then re-exec.
pub struct UpdateManager {
    exe_path: PathBuf,
    server: Option<String>,
    client: reqwest::Client,
    argv: Vec<OsString>,
}

impl UpdateManager {
    pub fn new(config: &AgentConfig, client: reqwest::Client) -> Self {
        Self {
            exe_path: config.exe_path.clone(),
            server: config.server.clone(),
            client,
            argv: std::env::args_os().collect(),
        }
    }

    fn staged_path(&self) -> PathBuf {
        path_with_suffix(&self.exe_path, ".new")
    }

    fn backup_path(&self) -> PathBuf {
        path_with_suffix(&self.exe_path, ".backup")
    }

    /// MD5 of the agent's own executable, streamed in chunks.
    pub fn current_hash(&self) -> Result<String, AgentError> {
        hash_file(&self.exe_path)
    }

    /// Ask the orchestrator whether our hash is current.
    pub async fn check(&self) -> Result<UpdateCheck, AgentError> {
        let Some(server) = &self.server else {
            return Err(AgentError::UpdateCheckFailed("no server configured".into()));
        };
        let hash = self.current_hash()?;
        let url = format!("{server}/agent/check?hash={hash}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::UpdateCheckFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::UpdateCheckFailed(format!(
                "orchestrator returned {}",
                resp.status()
            )));
        }
        resp.json::<UpdateCheck>()
            .await
            .map_err(|e| AgentError::UpdateCheckFailed(e.to_string()))
    }

    /// Stream the new executable to `<path>.new`, verifying the MD5 against
    /// the `X-Agent-Hash` header when the orchestrator sends one.
    pub async fn download(&self) -> Result<PathBuf, AgentError> {
        let Some(server) = &self.server else {
            return Err(AgentError::UpdateDownloadFailed("no server configured".into()));
        };
        let url = format!("{server}/agent/download");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::UpdateDownloadFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::UpdateDownloadFailed(format!(
                "orchestrator returned {}",
                resp.status()
            )));
        }

        let expected = resp
            .headers()
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());

        let staged = self.staged_path();
        let mut file = tokio::fs::File::create(&staged)
            .await
            .map_err(|e| AgentError::UpdateDownloadFailed(e.to_string()))?;

        let mut hasher = Md5::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AgentError::UpdateDownloadFailed(e.to_string()))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| AgentError::UpdateDownloadFailed(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| AgentError::UpdateDownloadFailed(e.to_string()))?;
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = expected {
            if expected != actual {
                let _ = std::fs::remove_file(&staged);
                return Err(AgentError::UpdateVerifyFailed(format!(
                    "expected {expected}, got {actual}"
                )));
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755));
        }

        info!(path = %staged.display(), hash = %actual, "Update downloaded");
        Ok(staged)
    }

    /// Swap the staged executable into place, keeping a backup of the old
    /// build. On failure the backup is restored.
    pub fn apply(&self) -> Result<(), AgentError> {
        let staged = self.staged_path();
        let backup = self.backup_path();

        std::fs::copy(&self.exe_path, &backup)
            .map_err(|e| AgentError::UpdateApplyFailed(format!("backup failed: {e}")))?;

        if let Err(e) = std::fs::rename(&staged, &self.exe_path) {
            warn!(error = %e, "Swap failed, restoring backup");
            if let Err(restore) = std::fs::copy(&backup, &self.exe_path) {
                error!(error = %restore, "Backup restore failed");
            }
            return Err(AgentError::UpdateApplyFailed(e.to_string()));
        }

        info!(path = %self.exe_path.display(), "Executable replaced");
        Ok(())
    }

    /// Full cycle: check, and when an update is pending, download + apply.
    /// Returns true when a restart is required.
    pub async fn check_and_apply(&self) -> Result<bool, AgentError> {
        let check = self.check().await?;
        if !check.needs_update {
            return Ok(false);
        }

        info!(
            version = check.current_version.as_deref().unwrap_or("unknown"),
            "Update available, downloading"
        );
        self.download().await?;
        self.apply()?;
        Ok(true)
    }

    /// Replace this process with the new image, preserving the original
    /// argument vector and environment. Falls back to a detached spawn +
    /// clean exit where exec is unavailable.
    pub fn restart(&self) -> ! {
        info!("Restarting with the updated executable");

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = std::process::Command::new(&self.exe_path)
                .args(self.argv.iter().skip(1))
                .exec();
            error!(error = %err, "exec failed, falling back to spawn");
        }

        match std::process::Command::new(&self.exe_path)
            .args(self.argv.iter().skip(1))
            .spawn()
        {
            Ok(_) => std::process::exit(0),
            Err(e) => {
                error!(error = %e, "Failed to spawn replacement process");
                std::process::exit(1)
            }
        }
    }
}

fn path_with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// MD5 of a file's contents, read in fixed-size chunks.
fn hash_file(path: &std::path::Path) -> Result<String, AgentError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| AgentError::UpdateCheckFailed(format!("cannot read executable: {e}")))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| AgentError::UpdateCheckFailed(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
