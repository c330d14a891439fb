//! Push and tag orchestration with local-state rollback

use tracing::{info, warn};

use crate::error::GitError;
use crate::repository::RepoHandle;

use super::GitRepoOps;

/// Options for creating and publishing an annotated tag
pub struct TagSettings {
    pub name: String,
    pub message: String,
    pub commit: String,
    /// Tagger identity `(name, email)`; falls back to git's own config
    pub tagger: Option<(String, String)>,
}

/// `main` → `refs/heads/main`; full ref names pass through
pub fn expand_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

impl GitRepoOps {
    /// Advances the local ref to `commit`, then pushes it.
    ///
    /// The local ref is updated first so the repository matches intent; if
    /// the push fails the ref is restored to `last_commit` and the push
    /// error propagates. Local state never diverges from what was actually
    /// pushed.
    pub async fn push(
        &self,
        repo: &RepoHandle,
        ref_name: &str,
        commit: &str,
        last_commit: &str,
    ) -> Result<(), GitError> {
        let full_ref = expand_ref(ref_name);
        self.update_ref(repo, &full_ref, commit, Some(last_commit))
            .await?;

        let pushed = self
            .executor
            .execute("push", repo.push_url(), self.retry_attempts(), || {
                Ok(self
                    .auth_command(repo, self.config.push_timeout())?
                    .args(["push", repo.push_url(), &full_ref]))
            })
            .await;

        if let Err(push_err) = pushed {
            if let Err(rollback_err) = self
                .update_ref(repo, &full_ref, last_commit, Some(commit))
                .await
            {
                warn!(
                    repo = %repo.describe(),
                    reference = %full_ref,
                    revision = last_commit,
                    error = %rollback_err,
                    "failed to restore local ref after unsuccessful push"
                );
            }
            return Err(push_err);
        }
        Ok(())
    }

    /// Creates (or force-updates) a local annotated tag and publishes it.
    ///
    /// A tag of the same name already on the remote is deleted there first
    /// because tags are not fast-forwarded. If the final push fails the
    /// local tag is deleted again so local and remote stay consistent.
    pub async fn tag(&self, repo: &RepoHandle, settings: &TagSettings) -> Result<String, GitError> {
        self.create_local_tag(repo, settings).await?;

        let tag_ref = format!("refs/tags/{}", settings.name);
        let existing = self
            .ls_remote_matching(repo, repo.push_url(), true, std::slice::from_ref(&tag_ref))
            .await
            .map_err(|err| {
                warn!(
                    tag = %settings.name,
                    repo = %repo.describe(),
                    error = %err,
                    "failed to get information about the remote tag"
                );
                err
            })?;

        if existing.contains_key(&tag_ref) {
            self.push_refspec(repo, format!(":{tag_ref}")).await.map_err(|err| {
                warn!(
                    tag = %settings.name,
                    repo = %repo.describe(),
                    error = %err,
                    "failed to remove remote tag"
                );
                err
            })?;
            info!(tag = %settings.name, repo = %repo.describe(), "removed remote tag before update");
        }

        match self.push_refspec(repo, tag_ref).await {
            Ok(()) => {
                info!(tag = %settings.name, repo = %repo.describe(), "tag pushed");
                Ok(settings.name.clone())
            }
            Err(push_err) => {
                if let Err(delete_err) = self.delete_local_tag(repo, &settings.name).await {
                    warn!(
                        tag = %settings.name,
                        commit = %settings.commit,
                        repo = %repo.describe(),
                        error = %delete_err,
                        "failed to delete local tag after unsuccessful push"
                    );
                }
                Err(push_err)
            }
        }
    }

    pub(crate) async fn update_ref(
        &self,
        repo: &RepoHandle,
        full_ref: &str,
        new_value: &str,
        old_value: Option<&str>,
    ) -> Result<(), GitError> {
        let mut cmd = self
            .local_command(repo.dir())
            .args(["update-ref", full_ref, new_value]);
        if let Some(old) = old_value {
            cmd = cmd.arg(old);
        }
        let command_line = cmd.command_line();
        cmd.run()
            .await?
            .checked(&command_line, repo.dir())
            .map(|_| ())
    }

    async fn create_local_tag(
        &self,
        repo: &RepoHandle,
        settings: &TagSettings,
    ) -> Result<(), GitError> {
        let mut cmd = self
            .local_command(repo.dir())
            .args(["tag", "-a", "-m", &settings.message, "-f"])
            .arg(&settings.name)
            .arg(&settings.commit);
        if let Some((name, email)) = &settings.tagger {
            cmd = cmd
                .env("GIT_COMMITTER_NAME", name.clone())
                .env("GIT_COMMITTER_EMAIL", email.clone());
        }
        let command_line = cmd.command_line();
        cmd.run()
            .await?
            .checked(&command_line, repo.dir())
            .map(|_| ())
    }

    async fn delete_local_tag(&self, repo: &RepoHandle, name: &str) -> Result<(), GitError> {
        let cmd = self.local_command(repo.dir()).args(["tag", "-d", name]);
        let command_line = cmd.command_line();
        cmd.run()
            .await?
            .checked(&command_line, repo.dir())
            .map(|_| ())
    }

    async fn push_refspec(&self, repo: &RepoHandle, spec: String) -> Result<(), GitError> {
        self.executor
            .execute("push", repo.push_url(), self.retry_attempts(), || {
                Ok(self
                    .auth_command(repo, self.config.push_timeout())?
                    .args(["push", repo.push_url(), &spec]))
            })
            .await
            .map(|_| ())
    }
}
