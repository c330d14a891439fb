//! ls-remote and the TLS connectivity check

use std::collections::BTreeMap;

use crate::error::GitError;
use crate::repository::RepoHandle;
use crate::ssl;

use super::GitRepoOps;

impl GitRepoOps {
    /// Lists the remote's refs as a `name → commit` map.
    ///
    /// Annotated tags are peeled: the reported commit is the tag's target,
    /// not the tag object itself.
    pub async fn ls_remote(
        &self,
        repo: &RepoHandle,
    ) -> Result<BTreeMap<String, String>, GitError> {
        self.ls_remote_matching(repo, repo.fetch_url(), false, &[])
            .await
    }

    pub(crate) async fn ls_remote_matching(
        &self,
        repo: &RepoHandle,
        url: &str,
        tags_only: bool,
        patterns: &[String],
    ) -> Result<BTreeMap<String, String>, GitError> {
        let result = self
            .executor
            .execute("ls-remote", url, self.retry_attempts(), || {
                let mut cmd = self
                    .auth_command(repo, self.config.ls_remote_timeout())?
                    .arg("ls-remote");
                if tags_only {
                    cmd = cmd.arg("--tags");
                }
                cmd = cmd.arg(url);
                for pattern in patterns {
                    cmd = cmd.arg(pattern);
                }
                Ok(cmd)
            })
            .await?;
        parse_ls_remote(&result.stdout)
    }

    /// Probes TLS connectivity to an HTTP(S) remote without spawning git,
    /// using the merged certificate bundle when one is configured. Other
    /// URL schemes succeed trivially.
    pub async fn check_connection(&self, repo: &RepoHandle) -> Result<(), GitError> {
        let url = repo.fetch_url();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(());
        }
        let bundle = match &self.ssl {
            Some(manager) => manager.ensure_bundle().await?,
            None => None,
        };
        ssl::probe(
            url,
            repo.auth().proxy.as_ref(),
            bundle.as_deref(),
            self.config.probe_timeout(),
        )
        .await
    }
}

/// Parses `ls-remote` output. `<ref>^{}` advertisements replace the entry
/// for `<ref>` so callers always see the dereferenced commit for tags.
pub(crate) fn parse_ls_remote(stdout: &str) -> Result<BTreeMap<String, String>, GitError> {
    let mut refs = BTreeMap::new();
    for line in stdout.lines() {
        let Some((oid, name)) = line.split_once('\t') else {
            continue;
        };
        let oid = oid.trim();
        let mut name = name.trim();
        if oid.len() != 40 || name.is_empty() {
            continue;
        }

        if let Some(base) = name.strip_suffix("^{}") {
            if !refs.contains_key(base) {
                return Err(GitError::Config(format!(
                    "advertisement of {base}^{{}} came before {base}"
                )));
            }
            name = base;
        }
        refs.insert(name.to_string(), oid.to_string());
    }
    Ok(refs)
}
