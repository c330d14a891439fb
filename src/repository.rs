//! Repository handles passed into every operation

use std::path::{Path, PathBuf};

use crate::auth::AuthSettings;

/// Identifies a local on-disk repository, its remote URL(s) and auth.
/// Immutable for the duration of one operation; owned by the caller.
#[derive(Clone, Debug)]
pub struct RepoHandle {
    dir: PathBuf,
    fetch_url: String,
    push_url: Option<String>,
    auth: AuthSettings,
}

impl RepoHandle {
    pub fn new(dir: impl Into<PathBuf>, fetch_url: impl Into<String>, auth: AuthSettings) -> Self {
        Self {
            dir: dir.into(),
            fetch_url: fetch_url.into(),
            push_url: None,
            auth,
        }
    }

    /// Sets a push URL differing from the fetch URL
    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fetch_url(&self) -> &str {
        &self.fetch_url
    }

    /// Push URL, falling back to the fetch URL when none is configured
    pub fn push_url(&self) -> &str {
        self.push_url.as_deref().unwrap_or(&self.fetch_url)
    }

    pub fn auth(&self) -> &AuthSettings {
        &self.auth
    }

    /// Short description used in log lines: `(dir, url)`
    pub fn describe(&self) -> String {
        format!("({}, {})", self.dir.display(), self.fetch_url)
    }
}
