//! Git version detection and capability probes

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::error::GitError;

// Timeout for the `git --version` probe; it runs no network code
const VERSION_PROBE_TIMEOUT_SECS: u64 = 10;

/// Oldest git the native transport is willing to drive
pub const MIN_GIT_VERSION: GitVersion = GitVersion::new(1, 6, 4);

const PROGRESS_VERSION: GitVersion = GitVersion::new(1, 7, 1);
const RECURSE_SUBMODULES_VERSION: GitVersion = GitVersion::new(1, 7, 3);
const NO_SHOW_FORCED_UPDATES_VERSION: GitVersion = GitVersion::new(2, 23, 0);
const FETCH_STDIN_VERSION: GitVersion = GitVersion::new(2, 29, 0);

/// A parsed `major.minor.patch` git version
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GitVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `git --version` output such as `git version 2.40.1.windows.1`.
    /// Trailing platform components are ignored.
    pub fn parse(output: &str) -> Option<Self> {
        let rest = output.trim().strip_prefix("git version ")?;
        let mut parts = rest.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = parts.next()?.trim().parse().ok()?;
        let patch = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    /// `--progress` on fetch is understood from 1.7.1
    pub fn supports_progress(&self) -> bool {
        *self >= PROGRESS_VERSION
    }

    /// `--recurse-submodules=no` exists only after 1.7.3
    pub fn supports_recurse_submodules_flag(&self) -> bool {
        *self > RECURSE_SUBMODULES_VERSION
    }

    /// `--no-show-forced-updates` is understood from 2.23
    pub fn supports_no_show_forced_updates(&self) -> bool {
        *self >= NO_SHOW_FORCED_UPDATES_VERSION
    }

    /// `git fetch --stdin` (batched ref-specs) is understood from 2.29
    pub fn fetch_supports_stdin(&self) -> bool {
        *self >= FETCH_STDIN_VERSION
    }

    pub fn is_supported(&self) -> bool {
        *self >= MIN_GIT_VERSION
    }
}

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Runs `git --version` against the configured executable and parses the
/// result. Fails fast with a typed error when the executable is absent.
pub async fn detect(git_exec: &Path) -> Result<GitVersion, GitError> {
    let probe = Command::new(git_exec).arg("--version").output();

    let output = match tokio::time::timeout(
        Duration::from_secs(VERSION_PROBE_TIMEOUT_SECS),
        probe,
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GitError::MissingExecutable(git_exec.display().to_string()));
        }
        Ok(Err(e)) => {
            return Err(GitError::Spawn {
                command: format!("{} --version", git_exec.display()),
                source: e,
            });
        }
        Err(_) => {
            return Err(GitError::IdleTimeout {
                command: format!("{} --version", git_exec.display()),
                idle_secs: VERSION_PROBE_TIMEOUT_SECS,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    GitVersion::parse(&stdout).ok_or_else(|| {
        GitError::Config(format!(
            "cannot parse `{} --version` output: {}",
            git_exec.display(),
            stdout.trim()
        ))
    })
}
