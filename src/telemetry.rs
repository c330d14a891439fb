//! Duration telemetry for git operations

use std::time::Duration;

use dashmap::DashMap;

/// Aggregated figures for one counter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpStats {
    pub invocations: u64,
    pub failures: u64,
    pub total: Duration,
}

/// Named duration counters, optionally partitioned by repository URL.
/// Cheap to share: all state lives in a concurrent map.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: DashMap<String, OpStats>,
    per_url: bool,
}

impl Telemetry {
    pub fn new(per_url_metrics: bool) -> Self {
        Self {
            counters: DashMap::new(),
            per_url: per_url_metrics,
        }
    }

    /// Records one invocation of `action` against `repo_url`
    pub fn record(&self, action: &str, repo_url: &str, elapsed: Duration, success: bool) {
        let mut entry = self.counters.entry(self.key(action, repo_url)).or_default();
        entry.invocations += 1;
        entry.total += elapsed;
        if !success {
            entry.failures += 1;
        }
    }

    /// Counter value for `action`, or `None` when nothing was recorded.
    /// With per-URL partitioning enabled the URL must be supplied.
    pub fn stats(&self, action: &str, repo_url: Option<&str>) -> Option<OpStats> {
        let key = self.key(action, repo_url.unwrap_or(""));
        self.counters.get(&key).map(|entry| *entry)
    }

    /// All counters, for export into the host product's metric sink
    pub fn snapshot(&self) -> Vec<(String, OpStats)> {
        let mut all: Vec<(String, OpStats)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn key(&self, action: &str, repo_url: &str) -> String {
        if self.per_url && !repo_url.is_empty() {
            format!("{action}|{repo_url}")
        } else {
            action.to_string()
        }
    }
}
