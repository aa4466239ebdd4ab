use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Disks, System};

/// Hardware inventory refreshed on each probe cycle and served by
/// `/hardware`, `/capabilities`, and heartbeats.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareSnapshot {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub gpus: Vec<GpuInfo>,
    pub disk: Option<DiskInfo>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    pub model: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub frequency_mhz: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryInfo {
    pub total_mb: u64,
    pub available_mb: u64,
    pub used_mb: u64,
    pub swap_total_mb: u64,
    pub swap_used_mb: u64,
}

/// One GPU row as reported by the vendor query tool.
#[derive(Debug, Clone, Serialize)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    pub driver: String,
    pub vram_total_mb: u64,
    pub vram_used_mb: u64,
    pub vram_free_mb: u64,
    pub utilization_gpu_percent: Option<u64>,
    pub utilization_mem_percent: Option<u64>,
    pub temperature_c: Option<u64>,
    pub power_w: Option<f64>,
    pub power_limit_w: Option<f64>,
    pub pstate: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl HardwareSnapshot {
    /// VRAM usage of the busiest GPU, in percent. None when no GPU is present.
    pub fn vram_usage_percent(&self) -> Option<f64> {
        self.gpus
            .iter()
            .filter(|g| g.vram_total_mb > 0)
            .map(|g| g.vram_used_mb as f64 / g.vram_total_mb as f64 * 100.0)
            .fold(None, |acc, pct| match acc {
                Some(max) if max >= pct => Some(max),
                _ => Some(pct),
            })
    }

    pub fn has_gpu(&self) -> bool {
        !self.gpus.is_empty()
    }
}

/// Collect the full hardware inventory. Best-effort: every probe that fails
/// degrades to a placeholder rather than an error.
pub async fn collect() -> HardwareSnapshot {
    let mut sys = System::new_all();
    sys.refresh_all();

    let cpu = cpu_info(&sys);
    let memory = memory_info(&sys);
    let gpus = gpu_info_nvidia().await;
    let disk = root_disk_info();

    HardwareSnapshot {
        cpu,
        memory,
        gpus,
        disk,
        collected_at: Utc::now(),
    }
}

fn cpu_info(sys: &System) -> CpuInfo {
    let cpus = sys.cpus();
    let model = cpus
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let frequency_mhz = cpus.first().map(|c| c.frequency()).unwrap_or(0);

    CpuInfo {
        model,
        physical_cores: sys.physical_core_count().unwrap_or(0),
        logical_cores: cpus.len(),
        frequency_mhz,
    }
}

fn memory_info(sys: &System) -> MemoryInfo {
    const MB: u64 = 1024 * 1024;
    MemoryInfo {
        total_mb: sys.total_memory() / MB,
        available_mb: sys.available_memory() / MB,
        used_mb: sys.used_memory() / MB,
        swap_total_mb: sys.total_swap() / MB,
        swap_used_mb: sys.used_swap() / MB,
    }
}

/// Disk usage of the volume holding the root filesystem. Falls back to the
/// largest mounted volume when no "/" mount is listed.
fn root_disk_info() -> Option<DiskInfo> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().max_by_key(|d| d.total_space()))?;

    let total_bytes = disk.total_space();
    let free_bytes = disk.available_space();
    Some(DiskInfo {
        total_bytes,
        used_bytes: total_bytes.saturating_sub(free_bytes),
        free_bytes,
    })
}

/// Query all NVIDIA GPUs via nvidia-smi. Returns an empty list when the
/// tool is absent or exits non-zero.
async fn gpu_info_nvidia() -> Vec<GpuInfo> {
    let output = match tokio::process::Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,driver_version,memory.total,memory.used,memory.free,utilization.gpu,utilization.memory,temperature.gpu,power.draw,power.limit,pstate",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await
    {
        Ok(o) if o.status.success() => o,
        _ => return vec![],
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().filter_map(parse_gpu_line).collect()
}

fn parse_gpu_line(line: &str) -> Option<GpuInfo> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 6 {
        return None;
    }

    let vram_total_mb: u64 = parts[3].parse().ok()?;
    let vram_used_mb: u64 = parts[4].parse().ok()?;
    let vram_free_mb: u64 = parts[5].parse().ok()?;

    Some(GpuInfo {
        index: parts[0].parse().ok()?,
        name: parts[1].to_string(),
        driver: parts[2].to_string(),
        vram_total_mb,
        vram_used_mb,
        vram_free_mb,
        utilization_gpu_percent: parts.get(6).and_then(|s| s.parse().ok()),
        utilization_mem_percent: parts.get(7).and_then(|s| s.parse().ok()),
        temperature_c: parts.get(8).and_then(|s| s.parse().ok()),
        power_w: parts.get(9).and_then(|s| s.parse().ok()),
        power_limit_w: parts.get(10).and_then(|s| s.parse().ok()),
        pstate: parts.get(11).map(|s| s.to_string()).filter(|s| !s.is_empty()),
    })
}
