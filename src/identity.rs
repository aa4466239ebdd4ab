use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sysinfo::Networks;
use tracing::{info, warn};

use crate::config::AGENT_VERSION;

/// File holding the generated fallback id on platforms with no stable MAC.
const NODE_ID_FILE: &str = "agent_node_id";

/// Stable identity of this node, computed once at startup.
///
/// The node id is derived from the hostname plus the sorted set of
/// link-layer addresses, so it survives restarts and IP changes.
#[derive(Debug, Clone, Serialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub hostname: String,
    pub ip_addresses: Vec<String>,
    pub platform: String,
    pub agent_version: &'static str,
    pub agent_port: u16,
    pub started_at: DateTime<Utc>,
}

impl NodeIdentity {
    /// Detect the node identity. `data_dir` is where the fallback id file
    /// lives when the platform exposes no usable MAC address.
    pub fn detect(agent_port: u16, data_dir: &Path) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());

        let networks = Networks::new_with_refreshed_list();
        let macs = collect_macs(&networks);
        let ip_addresses = collect_ipv4(&networks);

        let seed = if macs.is_empty() {
            warn!("No usable MAC address found, using persisted fallback id");
            fallback_seed(data_dir)
        } else {
            macs.join("-")
        };

        let node_id = derive_node_id(&hostname, &seed);
        info!(node_id = %node_id, hostname = %hostname, ips = ?ip_addresses, "Node identity computed");

        let platform = sysinfo::System::long_os_version()
            .unwrap_or_else(|| std::env::consts::OS.to_string());

        Self {
            node_id,
            hostname,
            ip_addresses,
            platform,
            agent_version: AGENT_VERSION,
            agent_port,
            started_at: Utc::now(),
        }
    }
}

/// First 32 hex chars of sha256(hostname + "-" + seed).
fn derive_node_id(hostname: &str, seed: &str) -> String {
    let digest = Sha256::digest(format!("{hostname}-{seed}").as_bytes());
    hex::encode(digest)[..32].to_string()
}

/// Lexicographically sorted, deduplicated MAC addresses, excluding loopback
/// and unspecified interfaces.
fn collect_macs(networks: &Networks) -> Vec<String> {
    let mut macs: Vec<String> = networks
        .iter()
        .filter(|(name, _)| *name != "lo")
        .map(|(_, data)| data.mac_address())
        .filter(|mac| mac.0 != [0u8; 6])
        .map(|mac| mac.to_string().to_lowercase())
        .collect();
    macs.sort();
    macs.dedup();
    macs
}

/// All IPv4 addresses outside 127.0.0.0/8, sorted for a stable ordering.
fn collect_ipv4(networks: &Networks) -> Vec<String> {
    let mut ips: Vec<String> = networks
        .iter()
        .flat_map(|(_, data)| data.ip_networks())
        .filter_map(|net| match net.addr {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4.to_string()),
            _ => None,
        })
        .collect();
    ips.sort();
    ips.dedup();
    ips
}

/// Read (or create on first run) a persisted random seed so identity stays
/// stable across restarts on MAC-less platforms.
fn fallback_seed(data_dir: &Path) -> String {
    let path = data_dir.join(NODE_ID_FILE);
    match std::fs::read_to_string(&path) {
        Ok(existing) if !existing.trim().is_empty() => existing.trim().to_string(),
        _ => {
            let fresh = uuid::Uuid::new_v4().to_string();
            if let Err(e) = std::fs::write(&path, &fresh) {
                warn!(path = %path.display(), error = %e, "Failed to persist fallback node id");
            }
            fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_32_hex_chars() {
        let id = derive_node_id("worker-1", "aa:bb:cc:dd:ee:ff");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn node_id_is_stable_for_same_inputs() {
        let a = derive_node_id("worker-1", "aa:bb:cc:dd:ee:ff-11:22:33:44:55:66");
        let b = derive_node_id("worker-1", "aa:bb:cc:dd:ee:ff-11:22:33:44:55:66");
        assert_eq!(a, b);
    }

    #[test]
    fn node_id_differs_across_hosts() {
        let a = derive_node_id("worker-1", "aa:bb:cc:dd:ee:ff");
        let b = derive_node_id("worker-2", "aa:bb:cc:dd:ee:ff");
        assert_ne!(a, b);
    }

    #[test]
    fn fallback_seed_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let first = fallback_seed(dir.path());
        let second = fallback_seed(dir.path());
        assert_eq!(first, second);
        assert!(dir.path().join(NODE_ID_FILE).exists());
    }

    #[test]
    fn detect_produces_plausible_identity() {
        let dir = tempfile::tempdir().unwrap();
        let identity = NodeIdentity::detect(8765, dir.path());
        assert_eq!(identity.node_id.len(), 32);
        assert_eq!(identity.agent_port, 8765);
        assert!(!identity.hostname.is_empty());
        assert!(identity
            .ip_addresses
            .iter()
            .all(|ip| !ip.starts_with("127.")));
    }
}
