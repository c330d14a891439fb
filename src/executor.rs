//! Retry and SSL-trust fallback around single git invocations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::command::GitCommand;
use crate::config::PluginConfig;
use crate::error::{self, ErrorClass, GitError};
use crate::process::ExecResult;
use crate::retry;
use crate::ssl::SslCertManager;
use crate::telemetry::Telemetry;

// One bare attempt plus one with the merged certificate bundle applied;
// a trust failure after that is terminal.
const SSL_ATTEMPTS: u32 = 2;

/// Wraps command invocations with bounded transient retry, the two-phase
/// SSL certificate fallback and duration telemetry
pub struct CommandExecutor {
    config: Arc<PluginConfig>,
    ssl: Option<Arc<SslCertManager>>,
    telemetry: Arc<Telemetry>,
}

impl CommandExecutor {
    pub fn new(
        config: Arc<PluginConfig>,
        ssl: Option<Arc<SslCertManager>>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            config,
            ssl,
            telemetry,
        }
    }

    /// Runs the command produced by `build`, retrying transient failures up
    /// to `retry_attempts` times and negotiating the merged certificate
    /// bundle on an SSL trust failure. The second SSL failure propagates.
    pub async fn execute<F>(
        &self,
        action: &str,
        repo_url: &str,
        retry_attempts: u32,
        mut build: F,
    ) -> Result<ExecResult, GitError>
    where
        F: FnMut() -> Result<GitCommand, GitError>,
    {
        let mut ca_bundle: Option<PathBuf> = None;

        for ssl_attempt in 1..=SSL_ATTEMPTS {
            let result = self
                .run_with_retry(action, repo_url, retry_attempts, &mut build, ca_bundle.as_ref())
                .await;

            let err = match result {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            let manager = match &self.ssl {
                Some(manager)
                    if ssl_attempt < SSL_ATTEMPTS && err.class() == ErrorClass::SslTrust =>
                {
                    manager
                }
                _ => return Err(err),
            };

            match manager.ensure_bundle().await? {
                Some(bundle) => {
                    info!(
                        action,
                        url = repo_url,
                        bundle = %bundle.display(),
                        "SSL trust failure, retrying with merged certificate bundle"
                    );
                    ca_bundle = Some(bundle);
                }
                // no trusted certificates configured on disk: nothing to
                // negotiate with, the failure stands
                None => return Err(err),
            }
        }

        Err(GitError::Config(
            "ssl fallback loop ended without a result".into(),
        ))
    }

    async fn run_with_retry<F>(
        &self,
        action: &str,
        repo_url: &str,
        retry_attempts: u32,
        build: &mut F,
        ca_bundle: Option<&PathBuf>,
    ) -> Result<ExecResult, GitError>
    where
        F: FnMut() -> Result<GitCommand, GitError>,
    {
        let verbose = self.config.verbose_git_log;
        let telemetry = Arc::clone(&self.telemetry);

        retry::with_backoff(
            retry_attempts,
            self.config.retry_initial_delay(),
            |_attempt| {
                let built = build().map(|cmd| match ca_bundle {
                    Some(bundle) => cmd.env("GIT_SSL_CAINFO", bundle.display().to_string()),
                    None => cmd,
                });
                let telemetry = Arc::clone(&telemetry);
                let action = action.to_string();
                let repo_url = repo_url.to_string();
                async move {
                    let cmd = built?;
                    let command_line = cmd.command_line();
                    let repo_dir = cmd.current_dir.clone();

                    let start = Instant::now();
                    let outcome = cmd
                        .run()
                        .await
                        .and_then(|result| result.checked(&command_line, &repo_dir));
                    let elapsed = start.elapsed();

                    telemetry.record(&action, &repo_url, elapsed, outcome.is_ok());
                    if verbose {
                        info!(action = %action, url = %repo_url, ms = elapsed.as_millis() as u64, "git command finished");
                    } else {
                        debug!(action = %action, url = %repo_url, ms = elapsed.as_millis() as u64, "git command finished");
                    }
                    outcome
                }
            },
            error::is_recoverable,
        )
        .await
    }
}
