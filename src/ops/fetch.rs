//! Fetch and prune orchestration, including ref-spec narrowing

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ErrorClass, GitError};
use crate::process::{InterruptHandle, OutputListener, StuckProcessMonitor};
use crate::refspec::{self, FetchMode};
use crate::repository::RepoHandle;
use crate::version::GitVersion;

use super::GitRepoOps;

/// Per-fetch options beyond the repository handle
pub struct FetchSettings {
    pub mode: FetchMode,
    /// Receives progress lines from the tool's stderr
    pub listener: Option<Arc<dyn OutputListener>>,
    /// Kill switch covering every command this fetch spawns
    pub interrupt: InterruptHandle,
    /// Diagnostic dump file written by the child plus its heap limit;
    /// enables the stuck-process monitor when configured
    pub gc_dump: Option<(PathBuf, u64)>,
}

impl FetchSettings {
    pub fn new(mode: FetchMode) -> Self {
        Self {
            mode,
            listener: None,
            interrupt: InterruptHandle::new(),
            gc_dump: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn OutputListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl GitRepoOps {
    /// Fetches the refs selected by the settings' mode.
    ///
    /// When several explicit ref-specs are requested and some of them no
    /// longer resolve on the remote, the spec list is narrowed against a
    /// fresh ls-remote and the fetch retried; narrowing to nothing is
    /// success-with-nothing-to-fetch.
    pub async fn fetch(&self, repo: &RepoHandle, settings: &FetchSettings) -> Result<(), GitError> {
        let version = self.git_version().await?;
        let specs = refspec::specs_for_mode(&settings.mode);

        // Prune remote-tracking refs which no longer exist upstream before
        // fetching, otherwise git fails to update local branches which
        // were e.g. renamed.
        self.prune(repo, settings).await?;

        remove_ref_locks(repo.dir()).await;

        let explicit = matches!(settings.mode, FetchMode::RefSpecs(_));
        let use_stdin = explicit && specs.len() > 1 && version.fetch_supports_stdin();

        match self
            .run_fetch(repo, settings, &specs, use_stdin, version)
            .await
        {
            Err(err) if use_stdin && err.class() == ErrorClass::RemoteRefNotFound => {
                let remote_refs = self.ls_remote(repo).await?;
                let narrowed =
                    refspec::narrow(&specs, remote_refs.keys().map(String::as_str));
                if narrowed.is_empty() {
                    info!(
                        repo = %repo.describe(),
                        "all requested refs vanished from the remote, nothing to fetch"
                    );
                    return Ok(());
                }
                info!(
                    repo = %repo.describe(),
                    requested = specs.len(),
                    resolvable = narrowed.len(),
                    "retrying fetch with ref-specs the remote still advertises"
                );
                self.run_fetch(repo, settings, &narrowed, use_stdin, version)
                    .await
            }
            other => other,
        }
    }

    async fn run_fetch(
        &self,
        repo: &RepoHandle,
        settings: &FetchSettings,
        specs: &[String],
        use_stdin: bool,
        version: GitVersion,
    ) -> Result<(), GitError> {
        let monitor = settings.gc_dump.as_ref().map(|(dump, heap_limit)| {
            let interrupt = settings.interrupt.clone();
            StuckProcessMonitor::spawn(
                dump.clone(),
                *heap_limit,
                self.config.monitor.clone(),
                move || interrupt.interrupt("stuck process detected"),
            )
        });

        let result = self
            .executor
            .execute("fetch", repo.fetch_url(), self.retry_attempts(), || {
                let mut cmd = self
                    .auth_command(repo, self.config.fetch_timeout())?
                    .with_interrupt(settings.interrupt.clone())
                    .arg("fetch");
                if version.supports_progress() {
                    cmd = cmd.arg("--progress");
                } else {
                    cmd = cmd.arg("-q");
                }
                cmd = cmd.arg("--no-tags");
                if version.supports_recurse_submodules_flag() {
                    // submodules are processed separately
                    cmd = cmd.arg("--recurse-submodules=no");
                }
                if version.supports_no_show_forced_updates() {
                    cmd = cmd.arg("--no-show-forced-updates");
                }
                if use_stdin {
                    // argument-length safety for large explicit spec sets
                    let mut payload = specs.join("\n");
                    payload.push('\n');
                    cmd = cmd
                        .arg("--stdin")
                        .arg(repo.fetch_url())
                        .stdin(payload.into_bytes());
                } else {
                    cmd = cmd.arg(repo.fetch_url());
                    for spec in specs {
                        cmd = cmd.arg(spec);
                    }
                }
                if let Some(listener) = &settings.listener {
                    cmd = cmd.listener(Arc::clone(listener));
                }
                Ok(cmd)
            })
            .await;

        if let Some(monitor) = monitor {
            monitor.finish();
        }
        result.map(|_| ())
    }

    /// Removes remote-tracking refs that no longer exist upstream
    pub async fn prune(&self, repo: &RepoHandle, settings: &FetchSettings) -> Result<(), GitError> {
        let result = self
            .executor
            .execute("prune", repo.fetch_url(), self.retry_attempts(), || {
                Ok(self
                    .auth_command(repo, self.config.prune_timeout())?
                    .with_interrupt(settings.interrupt.clone())
                    .args(["remote", "prune", "origin"]))
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            // repositories addressed purely by URL have no named remote and
            // therefore nothing to prune
            Err(GitError::Failed { ref stderr, .. })
                if stderr.to_lowercase().contains("no such remote") =>
            {
                debug!(repo = %repo.describe(), "no origin remote configured, nothing to prune");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Deletes stale `.lock` files under `.git/refs` left behind by a killed
/// process; they would make every subsequent ref update fail
async fn remove_ref_locks(repo_dir: &Path) {
    let git_dir = repo_dir.join(".git");
    let _ = tokio::task::spawn_blocking(move || {
        let packed = git_dir.join("packed-refs.lock");
        if packed.exists() {
            debug!(path = %packed.display(), "removing stale ref lock");
            let _ = std::fs::remove_file(&packed);
        }
        remove_lock_files(&git_dir.join("refs"));
    })
    .await;
}

fn remove_lock_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_lock_files(&path);
        } else if path
            .extension()
            .map(|ext| ext == "lock")
            .unwrap_or(false)
        {
            debug!(path = %path.display(), "removing stale ref lock");
            let _ = std::fs::remove_file(&path);
        }
    }
}
