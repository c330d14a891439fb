//! Authentication settings injected into git invocations

use std::fmt;

use crate::error::GitError;

/// How to authenticate against the remote
#[derive(Clone)]
pub enum AuthMethod {
    /// No credentials; public repository or ambient configuration
    Anonymous,
    /// Username/password (or token) supplied through an ask-pass helper
    Password { username: String, password: String },
    /// SSH private key, inline or resolved from a key store
    SshKey {
        key: SshKeySource,
        passphrase: Option<String>,
    },
    /// Keys offered by a running ssh-agent
    SshAgent,
}

impl fmt::Debug for AuthMethod {
    // Credentials must never leak into logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Anonymous => write!(f, "Anonymous"),
            AuthMethod::Password { username, .. } => {
                write!(f, "Password {{ username: {username:?}, password: ***** }}")
            }
            AuthMethod::SshKey { key, .. } => write!(f, "SshKey {{ key: {key:?} }}"),
            AuthMethod::SshAgent => write!(f, "SshAgent"),
        }
    }
}

/// Where the decrypted private key material comes from
#[derive(Clone)]
pub enum SshKeySource {
    /// Key bytes supplied directly by the caller
    Inline(Vec<u8>),
    /// Key identified by id, resolved through an [`SshKeyStore`]
    Stored(String),
}

impl fmt::Debug for SshKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshKeySource::Inline(_) => write!(f, "Inline(*****)"),
            SshKeySource::Stored(id) => write!(f, "Stored({id:?})"),
        }
    }
}

/// External key store boundary: resolves an uploaded key id to decrypted
/// private key material. Decryption itself happens behind this trait.
pub trait SshKeyStore: Send + Sync {
    fn key(&self, id: &str, passphrase: Option<&str>) -> Result<Vec<u8>, GitError>;
}

/// HTTP(S) proxy resolved from configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyCredentials {{ username: {:?} }}", self.username)
    }
}

impl ProxySettings {
    /// Renders the `http_proxy`/`https_proxy` environment value,
    /// `user:pass@host:port` when credentials are present
    pub fn env_value(&self) -> String {
        match &self.credentials {
            Some(creds) => format!(
                "{}:{}@{}:{}",
                creds.username, creds.password, self.host, self.port
            ),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Proxy URL for the TLS connectivity probe
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Full auth descriptor attached to a repository handle
#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub method: AuthMethod,
    pub proxy: Option<ProxySettings>,
    /// Drive the external `ssh` binary instead of any built-in transport
    pub use_native_ssh: bool,
    /// Disable host-key checking for the spawned `ssh`
    pub ignore_known_hosts: bool,
    /// Request `-vvv` tracing from the spawned `ssh`
    pub verbose_ssh: bool,
}

impl AuthSettings {
    pub fn anonymous() -> Self {
        Self {
            method: AuthMethod::Anonymous,
            proxy: None,
            use_native_ssh: true,
            ignore_known_hosts: false,
            verbose_ssh: false,
        }
    }

    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::Password {
                username: username.into(),
                password: password.into(),
            },
            ..Self::anonymous()
        }
    }

    pub fn ssh_key(key: SshKeySource, passphrase: Option<String>) -> Self {
        Self {
            method: AuthMethod::SshKey { key, passphrase },
            ..Self::anonymous()
        }
    }
}
