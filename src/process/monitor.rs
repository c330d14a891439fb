//! Stuck-process detection from a GC diagnostic side-channel file
//!
//! The monitored child appends `timestamp;gc_duration_ms;mem_before_bytes;
//! mem_after_bytes` lines to a dump file. The monitor polls that file and,
//! when the most recent cycle cleaned almost nothing, left the heap nearly
//! full or took too long, declares the process stuck and fires a callback.
//! Advisory instrumentation only: it bounds a hang, it does not prevent one.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::MonitorConfig;

/// One parsed dump line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DumpSample {
    pub timestamp_ms: i64,
    pub gc_duration_ms: u64,
    pub mem_before_bytes: u64,
    pub mem_after_bytes: u64,
}

impl DumpSample {
    fn gc_duration_secs(&self) -> u64 {
        self.gc_duration_ms / 1000
    }

    fn cleaned_bytes(&self) -> u64 {
        self.mem_before_bytes.saturating_sub(self.mem_after_bytes)
    }
}

/// Parses dump text; blank and malformed lines are skipped so a partially
/// written trailing line never poisons the decision
pub fn parse_dump(text: &str) -> Vec<DumpSample> {
    let mut samples = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() < 4 {
            continue;
        }
        let parsed: Option<(i64, u64, u64, u64)> = (|| {
            Some((
                fields[0].parse().ok()?,
                fields[1].parse().ok()?,
                fields[2].parse().ok()?,
                fields[3].parse().ok()?,
            ))
        })();
        if let Some((timestamp_ms, gc_duration_ms, mem_before_bytes, mem_after_bytes)) = parsed {
            samples.push(DumpSample {
                timestamp_ms,
                gc_duration_ms,
                mem_before_bytes,
                mem_after_bytes,
            });
        }
    }
    samples
}

fn percent(all: u64, part: u64) -> u64 {
    if all == 0 {
        return 0;
    }
    (part as f64 / all as f64 * 100.0) as u64
}

/// Decision for the most recent sample against the configured thresholds
pub fn is_stuck(sample: &DumpSample, heap_limit_bytes: u64, config: &MonitorConfig) -> bool {
    let cleaned = percent(heap_limit_bytes, sample.cleaned_bytes());
    let usage = percent(heap_limit_bytes, sample.mem_after_bytes);

    cleaned < config.critical_memory_cleaned_percent
        || usage > config.critical_memory_usage_percent
        || sample.gc_duration_secs() > config.critical_gc_duration_secs
}

/// Watches a dump file for a running child and fires `on_stuck` once when
/// the thresholds trip. Inert unless enabled in configuration.
pub struct StuckProcessMonitor {
    stop: Option<watch::Sender<bool>>,
}

impl StuckProcessMonitor {
    pub fn spawn<F>(
        dump_path: PathBuf,
        heap_limit_bytes: u64,
        config: MonitorConfig,
        on_stuck: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        if !config.enabled {
            return Self { stop: None };
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            let poll = Duration::from_secs(config.poll_interval_secs.max(1));
            let mut last_len: u64 = 0;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }

                let text = match tokio::fs::read_to_string(&dump_path).await {
                    Ok(text) => text,
                    Err(e) => {
                        debug!(path = %dump_path.display(), error = %e, "dump file not readable yet");
                        continue;
                    }
                };

                // no new samples since the last poll: no decision either way
                if text.len() as u64 == last_len {
                    continue;
                }
                last_len = text.len() as u64;

                let samples = parse_dump(&text);
                let Some(last) = samples.last() else {
                    continue;
                };
                if is_stuck(last, heap_limit_bytes, &config) {
                    warn!(
                        timestamp_ms = last.timestamp_ms,
                        gc_duration_ms = last.gc_duration_ms,
                        mem_after_bytes = last.mem_after_bytes,
                        "child process looks stuck, requesting termination"
                    );
                    on_stuck();
                    return;
                }
            }
        });

        Self {
            stop: Some(stop_tx),
        }
    }

    /// Stops polling; the monitored process finished on its own
    pub fn finish(&self) {
        if let Some(stop) = &self.stop {
            let _ = stop.send(true);
        }
    }
}
