//! Process-wide render configuration, read from the environment once at
//! startup and passed by handle. Immutable thereafter.

use std::path::PathBuf;
use std::time::Duration;

pub const RENDERER_ENV_VAR: &str = "MIXFORGE_RENDERER";
pub const OUTPUT_DIR_ENV_VAR: &str = "MIXFORGE_OUTPUT_DIR";
pub const CPU_QUOTA_ENV_VAR: &str = "MIXFORGE_CPU_QUOTA_PCT";
pub const TIMEOUT_ENV_VAR: &str = "MIXFORGE_RENDER_TIMEOUT_SECS";
pub const MAX_WORKERS_ENV_VAR: &str = "MIXFORGE_MAX_WORKERS";
pub const QUEUE_LIMIT_ENV_VAR: &str = "MIXFORGE_QUEUE_LIMIT";

pub const DEFAULT_RENDERER_CMD: &str = "mixrender";
pub const DEFAULT_CPU_QUOTA_PCT: u8 = 80;
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// External rendering toolchain command.
    pub renderer_cmd: String,
    pub output_dir: PathBuf,
    /// CPU quota per render as a percentage of one core, always below 100 so
    /// a saturated render cannot starve the control plane.
    pub cpu_quota_pct: u8,
    pub render_timeout: Duration,
    /// Configured concurrency cap; effective pool size also reserves a core.
    pub max_workers: usize,
    /// Max queued (not yet running) jobs; None means unbounded FIFO.
    pub queue_limit: Option<usize>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            renderer_cmd: DEFAULT_RENDERER_CMD.to_string(),
            output_dir: default_output_dir(),
            cpu_quota_pct: DEFAULT_CPU_QUOTA_PCT,
            render_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_workers: DEFAULT_MAX_WORKERS,
            queue_limit: None,
        }
    }
}

impl RenderSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            renderer_cmd: env_string(RENDERER_ENV_VAR).unwrap_or(defaults.renderer_cmd),
            output_dir: env_string(OUTPUT_DIR_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            cpu_quota_pct: env_parse::<u8>(CPU_QUOTA_ENV_VAR)
                .map(|pct| pct.clamp(1, 99))
                .unwrap_or(defaults.cpu_quota_pct),
            render_timeout: env_parse::<u64>(TIMEOUT_ENV_VAR)
                .map(Duration::from_secs)
                .unwrap_or(defaults.render_timeout),
            max_workers: env_parse::<usize>(MAX_WORKERS_ENV_VAR)
                .filter(|w| *w > 0)
                .unwrap_or(defaults.max_workers),
            queue_limit: env_parse::<usize>(QUEUE_LIMIT_ENV_VAR),
        }
    }

    /// Effective worker pool size: min(configured cap, cores - 1), at least
    /// one. The reserved core keeps status queries responsive at full load.
    pub fn worker_slots(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        self.max_workers.min(cores.saturating_sub(1)).max(1)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixforge")
        .join("renders")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_slots_reserve_a_core() {
        let settings = RenderSettings {
            max_workers: 64,
            ..RenderSettings::default()
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        assert_eq!(settings.worker_slots(), (cores - 1).max(1));
    }

    #[test]
    fn worker_slots_respect_configured_cap() {
        let settings = RenderSettings {
            max_workers: 1,
            ..RenderSettings::default()
        };
        assert_eq!(settings.worker_slots(), 1);
    }

    #[test]
    fn default_quota_is_below_one_core() {
        let settings = RenderSettings::default();
        assert!(settings.cpu_quota_pct < 100);
        assert!(settings.cpu_quota_pct > 0);
    }
}
