//! One concrete git invocation: arguments, environment, auth material

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthMethod, AuthSettings, SshKeySource, SshKeyStore};
use crate::command::script;
use crate::error::GitError;
use crate::process::runner::{self, ExecResult, InterruptHandle, OutputListener};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

/// A fully assembled command invocation.
///
/// Post-actions registered here are guaranteed to run exactly once after
/// the process terminates, or on drop if the command is never spawned.
pub struct GitCommand {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<String>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) current_dir: PathBuf,
    pub(crate) input: Option<Vec<u8>>,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_output_bytes: usize,
    pub(crate) post_actions: Vec<Box<dyn FnOnce() + Send>>,
    pub(crate) listener: Option<Arc<dyn OutputListener>>,
    pub(crate) interrupt: InterruptHandle,
}

impl std::fmt::Debug for GitCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("current_dir", &self.current_dir)
            .field("input", &self.input)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_output_bytes", &self.max_output_bytes)
            .field("post_actions", &self.post_actions.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl GitCommand {
    pub fn new(program: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: repo_dir.into(),
            input: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            post_actions: Vec::new(),
            listener: None,
            interrupt: InterruptHandle::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        for (name, value) in vars {
            self.env.insert(name.clone(), value.clone());
        }
        self
    }

    /// Inserts `-c name=value` ahead of the subcommand so it applies to the
    /// whole invocation, submodule helpers included
    pub fn prepend_config(mut self, name: &str, value: &str) -> Self {
        self.args.insert(0, "-c".to_string());
        self.args.insert(1, format!("{name}={value}"));
        self
    }

    pub fn stdin(mut self, payload: Vec<u8>) -> Self {
        self.input = Some(payload);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn OutputListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registers a cleanup closure run after the process exits, whatever
    /// the outcome
    pub fn post_action(mut self, action: impl FnOnce() + Send + 'static) -> Self {
        self.post_actions.push(Box::new(action));
        self
    }

    /// Shares this command's kill switch with another task
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Replaces the kill switch, letting one handle cover a whole operation
    /// spanning several commands
    pub fn with_interrupt(mut self, handle: InterruptHandle) -> Self {
        self.interrupt = handle;
        self
    }

    /// Injects authentication material and proxy settings.
    ///
    /// Fails before anything is spawned when auth material cannot be
    /// prepared; files already written are cleaned up on drop.
    pub fn with_auth(
        mut self,
        auth: &AuthSettings,
        keys: Option<&dyn SshKeyStore>,
        disable_credential_helper: bool,
    ) -> Result<Self, GitError> {
        if disable_credential_helper {
            // an empty helper resets the configured helper list so git
            // never falls back to an interactive prompt
            self = self.prepend_config("credential.helper", "");
        }

        if let Some(proxy) = &auth.proxy {
            let value = proxy.env_value();
            self = self.env("http_proxy", value.clone()).env("https_proxy", value);
        }

        match &auth.method {
            AuthMethod::Anonymous | AuthMethod::SshAgent => {}
            AuthMethod::Password { password, .. } => {
                let ask_pass = script::generate_ask_pass(password)?;
                let cleanup = ask_pass.clone();
                self = self
                    .post_action(move || script::remove_quietly(&cleanup))
                    .env("GIT_ASKPASS", ask_pass.display().to_string())
                    .prepend_config("core.askpass", &ask_pass.display().to_string());
            }
            AuthMethod::SshKey { key, passphrase } => {
                if auth.use_native_ssh {
                    let material = match key {
                        SshKeySource::Inline(bytes) => bytes.clone(),
                        SshKeySource::Stored(id) => keys
                            .ok_or_else(|| {
                                GitError::MissingAuthMaterial(format!(
                                    "stored key `{id}` requested but no key store configured"
                                ))
                            })?
                            .key(id, passphrase.as_deref())?,
                    };
                    let key_file = script::write_private_key(&material)?;
                    let cleanup = key_file.clone();
                    self = self.post_action(move || script::remove_quietly(&cleanup));
                    let ssh_command = ssh_command_for(&key_file, auth);
                    self = self.env("GIT_SSH_COMMAND", ssh_command);
                }
            }
        }

        Ok(self)
    }

    /// Rendering of the invocation for log lines and error messages
    pub fn command_line(&self) -> String {
        let program = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string());
        if self.args.is_empty() {
            program
        } else {
            format!("{} {}", program, self.args.join(" "))
        }
    }

    /// Runs this invocation through the process runner
    pub async fn run(self) -> Result<ExecResult, GitError> {
        runner::run(self).await
    }

    pub(crate) fn take_post_actions(&mut self) -> Vec<Box<dyn FnOnce() + Send>> {
        std::mem::take(&mut self.post_actions)
    }
}

impl Drop for GitCommand {
    // A command that was built but never spawned still owes its cleanups
    // (ask-pass scripts, key files)
    fn drop(&mut self) {
        for action in self.post_actions.drain(..) {
            action();
        }
    }
}

fn ssh_command_for(key_file: &std::path::Path, auth: &AuthSettings) -> String {
    let mut ssh = format!("ssh -i \"{}\"", key_file.display());
    if auth.ignore_known_hosts {
        ssh.push_str(
            " -o \"StrictHostKeyChecking=no\" -o \"UserKnownHostsFile=/dev/null\" -o \"GlobalKnownHostsFile=/dev/null\"",
        );
    }
    ssh.push_str(" -o \"IdentitiesOnly=yes\"");
    if auth.verbose_ssh {
        ssh.push_str(" -vvv");
    }
    ssh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ProxySettings;

    fn command() -> GitCommand {
        GitCommand::new("git", "/work/repo")
    }

    #[test]
    fn test_prepend_config_keeps_subcommand_last() {
        let cmd = command()
            .arg("fetch")
            .arg("origin")
            .prepend_config("credential.helper", "");
        assert_eq!(
            cmd.args,
            vec!["-c", "credential.helper=", "fetch", "origin"]
        );
    }

    #[test]
    fn test_command_line_rendering() {
        let cmd = GitCommand::new("/usr/bin/git", "/work/repo")
            .arg("ls-remote")
            .arg("origin");
        assert_eq!(cmd.command_line(), "git ls-remote origin");
    }

    #[test]
    fn test_password_auth_wires_ask_pass() {
        let auth = AuthSettings::password("builder", "hunter2");
        let cmd = command()
            .arg("fetch")
            .with_auth(&auth, None, true)
            .unwrap();

        let ask_pass = cmd.env.get("GIT_ASKPASS").cloned().expect("GIT_ASKPASS set");
        assert!(std::path::Path::new(&ask_pass).exists());
        assert!(cmd
            .args
            .iter()
            .any(|a| a.starts_with("core.askpass=")));
        assert_eq!(cmd.args[0], "-c");

        drop(cmd);
        // the drop path must clean the script up even though nothing ran
        assert!(!std::path::Path::new(&ask_pass).exists());
    }

    #[test]
    fn test_ssh_key_auth_writes_key_file() {
        let auth = AuthSettings::ssh_key(SshKeySource::Inline(b"KEY".to_vec()), None);
        let cmd = command().arg("fetch").with_auth(&auth, None, false).unwrap();

        let ssh = cmd.env.get("GIT_SSH_COMMAND").cloned().expect("ssh command");
        assert!(ssh.starts_with("ssh -i \""));
        assert!(ssh.contains("IdentitiesOnly=yes"));
        assert!(!ssh.contains("StrictHostKeyChecking"));
        assert!(!ssh.contains("-vvv"));
        drop(cmd);
    }

    #[test]
    fn test_ssh_options_follow_flags() {
        let mut auth = AuthSettings::ssh_key(SshKeySource::Inline(b"KEY".to_vec()), None);
        auth.ignore_known_hosts = true;
        auth.verbose_ssh = true;
        let cmd = command().with_auth(&auth, None, false).unwrap();
        let ssh = cmd.env.get("GIT_SSH_COMMAND").unwrap();
        assert!(ssh.contains("StrictHostKeyChecking=no"));
        assert!(ssh.ends_with("-vvv"));
    }

    #[test]
    fn test_stored_key_without_store_fails_fast() {
        let auth = AuthSettings::ssh_key(SshKeySource::Stored("key-1".into()), None);
        let err = command().with_auth(&auth, None, false).unwrap_err();
        assert!(matches!(err, GitError::MissingAuthMaterial(_)));
    }

    #[test]
    fn test_proxy_env_injection() {
        let mut auth = AuthSettings::anonymous();
        auth.proxy = Some(ProxySettings {
            host: "proxy.local".into(),
            port: 3128,
            credentials: None,
        });
        let cmd = command().with_auth(&auth, None, false).unwrap();
        assert_eq!(cmd.env.get("http_proxy").unwrap(), "proxy.local:3128");
        assert_eq!(cmd.env.get("https_proxy").unwrap(), "proxy.local:3128");
    }
}
