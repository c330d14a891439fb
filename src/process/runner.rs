//! External process execution with idle timeout, interruption and
//! guaranteed post-action cleanup

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::GitCommand;
use crate::error::GitError;

// How often the idle watchdog re-checks the last-activity stamp
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Notified for every completed output line while the process runs
pub trait OutputListener: Send + Sync {
    fn on_stdout_line(&self, _line: &str) {}
    fn on_stderr_line(&self, _line: &str) {}
}

/// Cross-task kill switch for a running command.
///
/// Cloneable; `interrupt` from any task kills the child and marks the
/// eventual result as interrupted (distinct from an idle timeout).
#[derive(Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn interrupt(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Some(reason.into()));
    }

    pub fn is_interrupted(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a completed (or interrupted) process
#[derive(Debug)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Set when the process was killed through an [`InterruptHandle`]
    pub interrupted: bool,
    pub interrupt_reason: Option<String>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.interrupted
    }

    /// Converts interruption and non-zero exits into typed errors,
    /// preserving the tool's stderr verbatim
    pub fn checked(self, command: &str, repo_dir: &Path) -> Result<ExecResult, GitError> {
        if self.interrupted {
            return Err(GitError::Interrupted {
                command: command.to_string(),
                reason: self
                    .interrupt_reason
                    .unwrap_or_else(|| "interrupted".to_string()),
            });
        }
        if self.exit_code != 0 {
            return Err(GitError::from_failure(
                command.to_string(),
                self.exit_code,
                self.stdout,
                self.stderr,
                repo_dir,
            ));
        }
        Ok(self)
    }
}

// Runs the registered cleanup closures exactly once when dropped, which
// covers success, failure, timeout, interruption and panics alike.
pub(crate) struct PostActionGuard(Vec<Box<dyn FnOnce() + Send>>);

impl PostActionGuard {
    pub(crate) fn new(actions: Vec<Box<dyn FnOnce() + Send>>) -> Self {
        Self(actions)
    }
}

impl Drop for PostActionGuard {
    fn drop(&mut self) {
        for action in self.0.drain(..) {
            action();
        }
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    Interrupted(String),
    TimedOut,
}

/// Executes one command invocation to completion.
///
/// Output streams are consumed line-aware by dedicated tasks; the idle
/// watchdog kills a child that neither produced output nor exited for the
/// invocation's idle timeout.
pub async fn run(mut invocation: GitCommand) -> Result<ExecResult, GitError> {
    let command_line = invocation.command_line();
    let _cleanup = PostActionGuard::new(invocation.take_post_actions());

    if let Some(reason) = invocation.interrupt.reason() {
        return Err(GitError::Interrupted {
            command: command_line,
            reason,
        });
    }

    debug!(command = %command_line, dir = %invocation.current_dir.display(), "spawning");

    let mut cmd = tokio::process::Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(&invocation.env)
        .current_dir(&invocation.current_dir)
        .stdin(if invocation.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GitError::MissingExecutable(invocation.program.display().to_string())
        } else {
            GitError::Spawn {
                command: command_line.clone(),
                source: e,
            }
        }
    })?;

    let started = Instant::now();
    let activity = Arc::new(AtomicU64::new(0));

    if let (Some(mut stdin), Some(payload)) = (child.stdin.take(), invocation.input.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                warn!(error = %e, "failed to feed stdin payload");
            }
            // dropping stdin closes the pipe so the child sees EOF
        });
    }

    let stdout_task = child.stdout.take().map(|stream| {
        spawn_reader(
            stream,
            invocation.listener.clone(),
            false,
            Arc::clone(&activity),
            started,
            invocation.max_output_bytes,
        )
    });
    let stderr_task = child.stderr.take().map(|stream| {
        spawn_reader(
            stream,
            invocation.listener.clone(),
            true,
            Arc::clone(&activity),
            started,
            invocation.max_output_bytes,
        )
    });

    let mut interrupt_rx = invocation.interrupt.subscribe();
    let idle_limit_ms = invocation.idle_timeout.as_millis() as u64;

    enum Tick {
        Exited(std::io::Result<std::process::ExitStatus>),
        Interrupted(String),
        IdleCheck,
    }

    let outcome = loop {
        let tick = tokio::select! {
            status = child.wait() => Tick::Exited(status),
            changed = interrupt_rx.changed() => {
                match changed {
                    Ok(()) => match interrupt_rx.borrow_and_update().clone() {
                        Some(reason) => Tick::Interrupted(reason),
                        None => Tick::IdleCheck,
                    },
                    // sender alive for the lifetime of the invocation; a
                    // closed channel just degrades to idle polling
                    Err(_) => Tick::IdleCheck,
                }
            }
            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => Tick::IdleCheck,
        };

        match tick {
            Tick::Exited(Ok(status)) => break Outcome::Exited(status),
            Tick::Exited(Err(e)) => {
                return Err(GitError::Spawn {
                    command: command_line,
                    source: e,
                });
            }
            Tick::Interrupted(reason) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                break Outcome::Interrupted(reason);
            }
            Tick::IdleCheck => {
                let last_activity_ms = activity.load(Ordering::Relaxed);
                let now_ms = started.elapsed().as_millis() as u64;
                if now_ms.saturating_sub(last_activity_ms) > idle_limit_ms {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    break Outcome::TimedOut;
                }
            }
        }
    };

    let stdout = drain(stdout_task).await;
    let stderr = drain(stderr_task).await;
    let duration = started.elapsed();

    match outcome {
        Outcome::Exited(status) => Ok(ExecResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration,
            interrupted: false,
            interrupt_reason: None,
        }),
        Outcome::Interrupted(reason) => {
            debug!(command = %command_line, reason = %reason, "child interrupted");
            Ok(ExecResult {
                exit_code: -1,
                stdout,
                stderr,
                duration,
                interrupted: true,
                interrupt_reason: Some(reason),
            })
        }
        Outcome::TimedOut => Err(GitError::IdleTimeout {
            command: command_line,
            idle_secs: invocation.idle_timeout.as_secs(),
        }),
    }
}

fn spawn_reader<R>(
    stream: R,
    listener: Option<Arc<dyn OutputListener>>,
    is_stderr: bool,
    activity: Arc<AtomicU64>,
    started: Instant,
    max_bytes: usize,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = String::new();
        let mut truncated = false;
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            activity.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
            if let Some(listener) = &listener {
                if is_stderr {
                    listener.on_stderr_line(&line);
                } else {
                    listener.on_stdout_line(&line);
                }
            }
            if captured.len() + line.len() < max_bytes {
                captured.push_str(&line);
                captured.push('\n');
            } else if !truncated {
                truncated = true;
                captured.push_str("...[output truncated]\n");
            }
        }
        captured
    })
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
