//! Merged SSL certificate bundle and TLS connectivity probe
//!
//! When git cannot validate a server certificate, the executor falls back
//! to a single PEM bundle merged from the product's trusted-certificate
//! directory. The bundle is cached on disk and regenerated at most once
//! per content change, guarded by the manager's lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::ProxySettings;
use crate::error::GitError;

/// File name of the merged bundle inside the cache directory
pub const CERT_FILE: &str = "git-trust.pem";

const PEM_EXTENSIONS: &[&str] = &["pem", "crt", "cer"];

/// Owns the merged-bundle file and the lock serializing its regeneration.
/// One instance per process; shared via `Arc` between executors.
pub struct SslCertManager {
    trusted_dir: PathBuf,
    cache_dir: PathBuf,
    regen_lock: Mutex<()>,
}

impl SslCertManager {
    pub fn new(trusted_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            trusted_dir: trusted_dir.into(),
            cache_dir: cache_dir.into(),
            regen_lock: Mutex::new(()),
        }
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.cache_dir.join(CERT_FILE)
    }

    /// Concatenated PEM content of every certificate file in the trusted
    /// directory, in stable name order. Empty when the directory is
    /// missing or holds no certificates.
    pub async fn pem_content(&self) -> Result<String, GitError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.trusted_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => {
                return Err(GitError::Config(format!(
                    "cannot read trusted certificates from `{}`: {e}",
                    self.trusted_dir.display()
                )));
            }
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            GitError::Config(format!(
                "cannot list `{}`: {e}",
                self.trusted_dir.display()
            ))
        })? {
            let path = entry.path();
            let is_pem = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| PEM_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_pem {
                names.push(path);
            }
        }
        names.sort();

        let mut merged = String::new();
        for path in names {
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                GitError::Config(format!("cannot read certificate `{}`: {e}", path.display()))
            })?;
            merged.push_str(text.trim_end());
            merged.push('\n');
        }
        Ok(merged)
    }

    /// Brings the on-disk bundle up to date with the trusted directory and
    /// returns its path, or `None` when there are no trusted certificates.
    ///
    /// Concurrent callers serialize on the manager's lock; a caller that
    /// lost the regeneration race re-checks under the lock and finds the
    /// fresh bundle instead of rewriting it.
    pub async fn ensure_bundle(&self) -> Result<Option<PathBuf>, GitError> {
        let pem = self.pem_content().await?;
        let bundle = self.bundle_path();

        if pem.is_empty() {
            if bundle.exists() {
                let _ = tokio::fs::remove_file(&bundle).await;
            }
            return Ok(None);
        }

        if self.bundle_is_stale(&pem).await {
            let _guard = self.regen_lock.lock().await;
            if self.bundle_is_stale(&pem).await {
                tokio::fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
                    GitError::Config(format!(
                        "cannot create certificate cache dir `{}`: {e}",
                        self.cache_dir.display()
                    ))
                })?;
                tokio::fs::write(&bundle, &pem).await.map_err(|e| {
                    GitError::Config(format!(
                        "cannot write merged certificate bundle `{}`: {e}",
                        bundle.display()
                    ))
                })?;
                info!(bundle = %bundle.display(), "regenerated merged certificate bundle");
            } else {
                debug!(bundle = %bundle.display(), "bundle refreshed by a concurrent caller");
            }
        }

        Ok(Some(bundle))
    }

    async fn bundle_is_stale(&self, pem: &str) -> bool {
        match tokio::fs::read_to_string(self.bundle_path()).await {
            Ok(existing) => existing != pem,
            Err(_) => true,
        }
    }
}

/// TLS connectivity probe against a remote, optionally through a proxy and
/// with an explicit CA bundle. Used by `check_connection` to tell trust
/// problems from plain unreachability before any git process is spawned.
pub async fn probe(
    url: &str,
    proxy: Option<&ProxySettings>,
    ca_bundle: Option<&Path>,
    timeout: Duration,
) -> Result<(), GitError> {
    let mut builder = reqwest::Client::builder()
        .use_native_tls()
        .connect_timeout(timeout)
        .timeout(timeout);

    if let Some(bundle) = ca_bundle {
        let pem = tokio::fs::read(bundle).await.map_err(|e| GitError::Config(format!(
            "cannot read CA bundle `{}`: {e}",
            bundle.display()
        )))?;
        for cert in reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            GitError::Config(format!("invalid CA bundle `{}`: {e}", bundle.display()))
        })? {
            builder = builder.add_root_certificate(cert);
        }
    }

    if let Some(proxy) = proxy {
        let mut p = reqwest::Proxy::all(proxy.url()).map_err(|e| {
            GitError::Config(format!("invalid proxy `{}`: {e}", proxy.url()))
        })?;
        if let Some(creds) = &proxy.credentials {
            p = p.basic_auth(&creds.username, &creds.password);
        }
        builder = builder.proxy(p);
    }

    let client = builder.build().map_err(|e| GitError::ConnectionCheck {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    match client.get(url).send().await {
        // any HTTP response proves the TLS handshake succeeded
        Ok(_) => Ok(()),
        Err(e) => Err(GitError::ConnectionCheck {
            url: url.to_string(),
            message: e.to_string(),
        }),
    }
}
