//! Local repository maintenance: init, status, config, add, commit,
//! repack, fsck and history queries

use std::collections::BTreeSet;
use std::path::Path;

use tracing::warn;

use crate::error::GitError;
use crate::repository::RepoHandle;

use super::GitRepoOps;

/// Outcome of `init`: the branch when the repository already existed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitResult {
    pub branch: Option<String>,
    pub existing: bool,
}

/// Parsed `git status --porcelain --branch` output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusResult {
    pub branch: Option<String>,
    pub modified: Vec<String>,
}

/// Which config file a setting lands in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigScope {
    Local,
    Global,
}

impl ConfigScope {
    fn flag(&self) -> &'static str {
        match self {
            ConfigScope::Local => "--local",
            ConfigScope::Global => "--global",
        }
    }
}

impl GitRepoOps {
    /// Initializes a repository at `dir`, or reports on the existing one.
    /// A dirty existing work tree is logged, not failed.
    pub async fn init(
        &self,
        dir: &Path,
        bare: bool,
        initial_branch: Option<&str>,
    ) -> Result<InitResult, GitError> {
        if dir.join(".git").exists() {
            let status = self.status(dir).await?;
            if !status.modified.is_empty() {
                warn!(
                    dir = %dir.display(),
                    count = status.modified.len(),
                    "found modified files in existing repository"
                );
            }
            return Ok(InitResult {
                branch: status.branch,
                existing: true,
            });
        }

        self.run_local("init", || {
            let mut cmd = self.local_command(dir).arg("init");
            if bare {
                cmd = cmd.arg("--bare");
            }
            if let Some(branch) = initial_branch {
                cmd = cmd.arg(format!("--initial-branch={branch}"));
            }
            Ok(cmd)
        })
        .await?;

        Ok(InitResult {
            branch: initial_branch.map(str::to_string),
            existing: false,
        })
    }

    pub async fn status(&self, dir: &Path) -> Result<StatusResult, GitError> {
        let result = self
            .run_local("status", || {
                Ok(self
                    .local_command(dir)
                    .args(["status", "--porcelain", "--branch"]))
            })
            .await?;
        Ok(parse_status(&result.stdout))
    }

    pub async fn set_config(
        &self,
        dir: &Path,
        scope: ConfigScope,
        name: &str,
        value: &str,
    ) -> Result<(), GitError> {
        self.run_local("config", || {
            Ok(self
                .local_command(dir)
                .args(["config", scope.flag(), name, value]))
        })
        .await
        .map(|_| ())
    }

    pub async fn unset_config(
        &self,
        dir: &Path,
        scope: ConfigScope,
        name: &str,
    ) -> Result<(), GitError> {
        self.run_local("config", || {
            Ok(self
                .local_command(dir)
                .args(["config", scope.flag(), "--unset", name]))
        })
        .await
        .map(|_| ())
    }

    /// Stages the given paths, or everything when `paths` is empty
    pub async fn add(&self, dir: &Path, paths: &[String]) -> Result<(), GitError> {
        self.run_local("add", || {
            let mut cmd = self.local_command(dir).args(["add", "-A"]);
            if !paths.is_empty() {
                cmd = cmd.arg("--");
                for path in paths {
                    cmd = cmd.arg(path);
                }
            }
            Ok(cmd)
        })
        .await
        .map(|_| ())
    }

    pub async fn commit(
        &self,
        dir: &Path,
        message: &str,
        author: Option<&str>,
    ) -> Result<(), GitError> {
        self.run_local("commit", || {
            let mut cmd = self.local_command(dir).args(["commit", "-m", message]);
            if let Some(author) = author {
                cmd = cmd.arg(format!("--author={author}"));
            }
            Ok(cmd)
        })
        .await
        .map(|_| ())
    }

    pub async fn repack(&self, dir: &Path) -> Result<(), GitError> {
        self.run_local("repack", || Ok(self.local_command(dir).arg("repack")))
            .await
            .map(|_| ())
    }

    /// Integrity check; returns the tool's exit code because a non-zero
    /// result is an answer here, not a failure
    pub async fn fsck(&self, dir: &Path) -> Result<i32, GitError> {
        let cmd = self.local_command(dir).arg("fsck");
        let command_line = cmd.command_line();
        let result = cmd.run().await?;
        if result.interrupted {
            return Err(GitError::Interrupted {
                command: command_line,
                reason: result
                    .interrupt_reason
                    .unwrap_or_else(|| "interrupted".to_string()),
            });
        }
        Ok(result.exit_code)
    }

    /// Paths touched by history reachable from `start` but not from any of
    /// `excluded`, unique and sorted
    pub async fn changed_paths(
        &self,
        repo: &RepoHandle,
        start: &str,
        excluded: &[String],
    ) -> Result<Vec<String>, GitError> {
        let result = self
            .run_local("diff", || {
                let mut cmd = self
                    .local_command(repo.dir())
                    .args(["log", "--format=", "--name-only", start]);
                for rev in excluded {
                    cmd = cmd.arg(format!("^{rev}"));
                }
                Ok(cmd)
            })
            .await?;

        let paths: BTreeSet<String> = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(paths.into_iter().collect())
    }

    /// Commits reachable from `start` (minus `excluded`) touching any of
    /// `paths`, newest first, capped at `max_commits`
    pub async fn commits_by_paths(
        &self,
        repo: &RepoHandle,
        start: &str,
        excluded: &[String],
        max_commits: usize,
        paths: &[String],
    ) -> Result<Vec<String>, GitError> {
        let result = self
            .run_local("log", || {
                let mut cmd = self
                    .local_command(repo.dir())
                    .args(["log", "--format=%H", "-n"])
                    .arg(max_commits.to_string())
                    .arg(start);
                for rev in excluded {
                    cmd = cmd.arg(format!("^{rev}"));
                }
                cmd = cmd.arg("--");
                for path in paths {
                    cmd = cmd.arg(path);
                }
                Ok(cmd)
            })
            .await?;

        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    // Local commands skip retry and auth but still feed the duration
    // telemetry through the executor's aggregate bucket.
    async fn run_local<F>(
        &self,
        action: &str,
        build: F,
    ) -> Result<crate::process::ExecResult, GitError>
    where
        F: FnMut() -> Result<crate::command::GitCommand, GitError>,
    {
        self.executor.execute(action, "", 1, build).await
    }
}

fn parse_status(stdout: &str) -> StatusResult {
    let mut branch = None;
    let mut modified = Vec::new();
    for line in stdout.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            // "main...origin/main [ahead 1]" or "No commits yet on main"
            let name = header.split("...").next().unwrap_or(header).trim();
            if !name.is_empty() && !name.starts_with("HEAD") {
                branch = Some(name.to_string());
            }
        } else if line.len() > 3 {
            modified.push(line[3..].trim().to_string());
        }
    }
    StatusResult { branch, modified }
}
