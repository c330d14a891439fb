//! Operation orchestration: fetch, push, tag, ls-remote and local
//! repository maintenance on top of the executor and command builder

mod fetch;
mod local;
mod push;
mod remote;

pub use fetch::FetchSettings;
pub use local::{ConfigScope, InitResult, StatusResult};
pub use push::TagSettings;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::auth::SshKeyStore;
use crate::command::GitCommand;
use crate::config::PluginConfig;
use crate::error::GitError;
use crate::executor::CommandExecutor;
use crate::repository::RepoHandle;
use crate::ssl::SslCertManager;
use crate::telemetry::Telemetry;
use crate::version::{self, GitVersion, MIN_GIT_VERSION};

/// Drives the external `git` binary for every operation this crate offers.
///
/// Cheap to share behind an `Arc`; operations on distinct repositories run
/// fully in parallel. Callers serialize operations per physical repository.
pub struct GitRepoOps {
    pub(crate) config: Arc<PluginConfig>,
    pub(crate) executor: CommandExecutor,
    pub(crate) ssl: Option<Arc<SslCertManager>>,
    telemetry: Arc<Telemetry>,
    keys: Option<Arc<dyn SshKeyStore>>,
    version: OnceCell<GitVersion>,
}

impl GitRepoOps {
    pub fn new(config: PluginConfig) -> Self {
        let config = Arc::new(config);
        let telemetry = Arc::new(Telemetry::new(config.per_url_metrics));
        let ssl = config
            .trusted_certs_dir
            .as_ref()
            .map(|dir| Arc::new(SslCertManager::new(dir, &config.ssl_cache_dir)));
        let executor = CommandExecutor::new(
            Arc::clone(&config),
            ssl.clone(),
            Arc::clone(&telemetry),
        );
        Self {
            config,
            executor,
            ssl,
            telemetry,
            keys: None,
            version: OnceCell::new(),
        }
    }

    /// Attaches the product's uploaded-key store for `Stored` key auth
    pub fn with_key_store(mut self, keys: Arc<dyn SshKeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Detected version of the configured executable, cached after the
    /// first probe. Versions below the supported minimum are rejected.
    pub async fn git_version(&self) -> Result<GitVersion, GitError> {
        let version = self
            .version
            .get_or_try_init(|| version::detect(&self.config.git_exec_path))
            .await?;
        if !version.is_supported() {
            return Err(GitError::UnsupportedVersion {
                found: *version,
                minimum: MIN_GIT_VERSION,
            });
        }
        Ok(*version)
    }

    // The runner enforces a no-output bound: the tighter of the operation
    // timeout and the global idle timeout.
    fn effective_idle(&self, op_timeout: Duration) -> Duration {
        op_timeout.min(self.config.idle_timeout())
    }

    /// Base invocation for a repository-local command
    pub(crate) fn local_command(&self, dir: &Path) -> GitCommand {
        GitCommand::new(&self.config.git_exec_path, dir)
            .idle_timeout(self.effective_idle(self.config.local_timeout()))
            .envs(&self.config.trace_env)
    }

    /// Base invocation for a remote-facing command, with auth injected and
    /// any externally configured credential helper disabled
    pub(crate) fn auth_command(
        &self,
        repo: &RepoHandle,
        timeout: Duration,
    ) -> Result<GitCommand, GitError> {
        GitCommand::new(&self.config.git_exec_path, repo.dir())
            .idle_timeout(self.effective_idle(timeout))
            .envs(&self.config.trace_env)
            .with_auth(repo.auth(), self.keys.as_deref(), true)
    }

    pub(crate) fn retry_attempts(&self) -> u32 {
        self.config.connection_retry_attempts
    }
}

/// Remote operations behind one interface, implemented by the native
/// external-binary transport here and by the in-process library transport
/// in the embedding product
#[async_trait]
pub trait VcsTransport: Send + Sync {
    async fn fetch(&self, repo: &RepoHandle, settings: &FetchSettings) -> Result<(), GitError>;
    async fn push(
        &self,
        repo: &RepoHandle,
        ref_name: &str,
        commit: &str,
        last_commit: &str,
    ) -> Result<(), GitError>;
    async fn tag(&self, repo: &RepoHandle, settings: &TagSettings) -> Result<String, GitError>;
    async fn ls_remote(&self, repo: &RepoHandle) -> Result<BTreeMap<String, String>, GitError>;
}

#[async_trait]
impl VcsTransport for GitRepoOps {
    async fn fetch(&self, repo: &RepoHandle, settings: &FetchSettings) -> Result<(), GitError> {
        GitRepoOps::fetch(self, repo, settings).await
    }

    async fn push(
        &self,
        repo: &RepoHandle,
        ref_name: &str,
        commit: &str,
        last_commit: &str,
    ) -> Result<(), GitError> {
        GitRepoOps::push(self, repo, ref_name, commit, last_commit).await
    }

    async fn tag(&self, repo: &RepoHandle, settings: &TagSettings) -> Result<String, GitError> {
        GitRepoOps::tag(self, repo, settings).await
    }

    async fn ls_remote(&self, repo: &RepoHandle) -> Result<BTreeMap<String, String>, GitError> {
        GitRepoOps::ls_remote(self, repo).await
    }
}

/// Which transport serves operations for this process
pub enum Transport {
    /// External `git` binary, driven by [`GitRepoOps`]
    Native(GitRepoOps),
    /// In-process library implementation, supplied by the embedding product
    Library,
}

/// Capability probe plus feature flag: native transport when it is enabled
/// and a supported `git` executable is present, library fallback otherwise
pub async fn select_transport(config: PluginConfig) -> Result<Transport, GitError> {
    if !config.use_native_transport {
        return Ok(Transport::Library);
    }
    let ops = GitRepoOps::new(config);
    match ops.git_version().await {
        Ok(_) => Ok(Transport::Native(ops)),
        Err(err @ GitError::UnsupportedVersion { .. })
        | Err(err @ GitError::MissingExecutable(_)) => {
            warn!(error = %err, "native git transport unavailable, falling back to library");
            Ok(Transport::Library)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_disabled_flag_selects_library() {
        let config = PluginConfig {
            use_native_transport: false,
            ..PluginConfig::default()
        };
        assert!(matches!(
            select_transport(config).await.unwrap(),
            Transport::Library
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_falls_back_to_library() {
        let config = PluginConfig {
            git_exec_path: PathBuf::from("no-such-git-binary-71ac"),
            ..PluginConfig::default()
        };
        assert!(matches!(
            select_transport(config).await.unwrap(),
            Transport::Library
        ));
    }
}
