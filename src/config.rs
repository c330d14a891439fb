//! Plugin configuration: consumed, not owned, by this crate

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::GitError;

// Defaults mirror conservative production values: git work is I/O bound
// and long fetches over slow links are normal.
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 600;
const DEFAULT_PRUNE_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_LS_REMOTE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOCAL_TIMEOUT_SECS: u64 = 600;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1000;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;

const DEFAULT_MONITOR_POLL_SECS: u64 = 10;
const DEFAULT_CRITICAL_GC_DURATION_SECS: u64 = 300;
const DEFAULT_CRITICAL_MEMORY_USAGE_PERCENT: u64 = 100;
const DEFAULT_CRITICAL_MEMORY_CLEANED_PERCENT: u64 = 0;

const DEFAULT_CACHE_ACCESS_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 1024;

/// Top-level configuration for the native git layer
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    /// Path to the git executable; resolved via PATH when relative
    pub git_exec_path: PathBuf,
    pub fetch_timeout_secs: u64,
    pub push_timeout_secs: u64,
    pub prune_timeout_secs: u64,
    pub ls_remote_timeout_secs: u64,
    /// Timeout for local-only commands (init, status, config, ...)
    pub local_timeout_secs: u64,
    /// Kill a child that produced no output for this long
    pub idle_timeout_secs: u64,
    pub connection_retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
    /// Log per-command details at info instead of debug
    pub verbose_git_log: bool,
    /// Partition duration metrics by repository URL
    pub per_url_metrics: bool,
    /// Select the external-binary transport over the in-process library
    pub use_native_transport: bool,
    /// Directory of trusted certificate PEM files; enables SSL fallback
    pub trusted_certs_dir: Option<PathBuf>,
    /// Where the merged certificate bundle is cached
    pub ssl_cache_dir: PathBuf,
    /// Connect timeout for the TLS connectivity probe
    pub probe_timeout_secs: u64,
    /// Extra environment (GIT_TRACE and friends) for every invocation
    pub trace_env: HashMap<String, String>,
    pub monitor: MonitorConfig,
    pub cache: CacheConfig,
}

/// Stuck-process monitor thresholds; advisory instrumentation only
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub critical_gc_duration_secs: u64,
    pub critical_memory_usage_percent: u64,
    pub critical_memory_cleaned_percent: u64,
}

/// Change-computation cache limits
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub access_ttl_secs: u64,
    pub max_size_mb: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            git_exec_path: PathBuf::from("git"),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            push_timeout_secs: DEFAULT_PUSH_TIMEOUT_SECS,
            prune_timeout_secs: DEFAULT_PRUNE_TIMEOUT_SECS,
            ls_remote_timeout_secs: DEFAULT_LS_REMOTE_TIMEOUT_SECS,
            local_timeout_secs: DEFAULT_LOCAL_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connection_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            verbose_git_log: false,
            per_url_metrics: false,
            use_native_transport: true,
            trusted_certs_dir: None,
            ssl_cache_dir: default_ssl_cache_dir(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            trace_env: HashMap::new(),
            monitor: MonitorConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: DEFAULT_MONITOR_POLL_SECS,
            critical_gc_duration_secs: DEFAULT_CRITICAL_GC_DURATION_SECS,
            critical_memory_usage_percent: DEFAULT_CRITICAL_MEMORY_USAGE_PERCENT,
            critical_memory_cleaned_percent: DEFAULT_CRITICAL_MEMORY_CLEANED_PERCENT,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: DEFAULT_CACHE_ACCESS_TTL_SECS,
            max_size_mb: DEFAULT_CACHE_MAX_SIZE_MB,
        }
    }
}

fn default_ssl_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gitexec")
        .join("ssl")
}

impl PluginConfig {
    /// Parses a TOML document; unknown keys are rejected so typos in
    /// deployment configs fail loudly
    pub fn from_toml_str(text: &str) -> Result<Self, GitError> {
        toml::from_str(text).map_err(|e| GitError::Config(format!("invalid configuration: {e}")))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn prune_timeout(&self) -> Duration {
        Duration::from_secs(self.prune_timeout_secs)
    }

    pub fn ls_remote_timeout(&self) -> Duration {
        Duration::from_secs(self.ls_remote_timeout_secs)
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.local_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
