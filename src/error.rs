//! Typed errors for external git invocations and stderr classification

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::version::GitVersion;

/// Errors produced while preparing, running or interpreting a git command
#[derive(Debug, Error)]
pub enum GitError {
    /// The configured git executable does not exist or is not runnable
    #[error("git executable `{0}` is missing or not runnable")]
    MissingExecutable(String),

    /// The process could not be spawned for a reason other than a missing executable
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process produced no output for longer than the idle timeout and was killed
    #[error("`{command}` produced no output for {idle_secs}s and was terminated")]
    IdleTimeout { command: String, idle_secs: u64 },

    /// The process was killed through an [`InterruptHandle`](crate::process::InterruptHandle)
    #[error("`{command}` was interrupted: {reason}")]
    Interrupted { command: String, reason: String },

    /// The process exited with a non-zero code; stderr is preserved verbatim
    #[error("`{command}` failed with exit code {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The repository index file is damaged; the caller should re-clone
    #[error("git index file `{index}` is corrupted: {message}")]
    CorruptedIndex { index: PathBuf, message: String },

    /// The repository index is stale and blocks a merge
    #[error("git index is outdated: {0}")]
    OutdatedIndex(String),

    /// The detected git version is below the supported minimum
    #[error("git version {found} is not supported, minimum is {minimum}")]
    UnsupportedVersion {
        found: GitVersion,
        minimum: GitVersion,
    },

    /// Auth material (password script, key file, stored key) could not be prepared
    #[error("auth material is not available: {0}")]
    MissingAuthMaterial(String),

    /// The TLS connectivity probe could not reach the remote
    #[error("connection check for `{url}` failed: {message}")]
    ConnectionCheck { url: String, message: String },

    /// Waiting on a shared change computation exceeded the caller's timeout
    #[error("timed out after {0:?} waiting for a change computation")]
    CacheWaitTimeout(std::time::Duration),

    /// A shared change computation finished with an error
    #[error("change computation failed: {0}")]
    ChangeComputation(String),

    /// Invalid configuration or API misuse
    #[error("{0}")]
    Config(String),
}

/// Coarse classification of a failure, used by the executor to decide
/// between retry, SSL fallback, ref-spec narrowing and propagation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The tool could not validate the server certificate
    SslTrust,
    /// The remote rejected the provided credentials
    Authentication,
    /// A requested ref no longer exists on the remote
    RemoteRefNotFound,
    /// Network-level failure that a retry may recover from
    Transient,
    /// The child process ran out of memory
    OutOfMemory,
    /// Local index file is damaged
    CorruptedIndex,
    /// Local index is stale
    OutdatedIndex,
    /// The remote denied access; retrying the same command is pointless
    RemoteAccess,
    /// The operation was cancelled from outside
    Cancelled,
    /// Anything else; not retried
    Fatal,
}

// Substring patterns matched case-insensitively against stderr, first hit
// wins. Order matters: index corruption must be recognized before the
// generic "fatal:" noise around it.
const CLASS_PATTERNS: &[(&str, ErrorClass)] = &[
    ("fatal: index file smaller than expected", ErrorClass::CorruptedIndex),
    ("fatal: index file corrupt", ErrorClass::CorruptedIndex),
    ("ssl certificate problem", ErrorClass::SslTrust),
    ("error setting certificate verify locations", ErrorClass::SslTrust),
    ("server certificate verification failed", ErrorClass::SslTrust),
    ("authentication failed", ErrorClass::Authentication),
    ("couldn't find remote ref", ErrorClass::RemoteRefNotFound),
    ("out of memory", ErrorClass::OutOfMemory),
    ("connection timed out", ErrorClass::Transient),
    ("operation timed out", ErrorClass::Transient),
    ("connection refused", ErrorClass::Transient),
    ("connection reset", ErrorClass::Transient),
    ("could not resolve host", ErrorClass::Transient),
    ("early eof", ErrorClass::Transient),
    ("the remote end hung up unexpectedly", ErrorClass::Transient),
    ("no remote repository specified", ErrorClass::RemoteAccess),
    ("no such remote", ErrorClass::RemoteAccess),
    ("access denied", ErrorClass::RemoteAccess),
    ("permission denied", ErrorClass::RemoteAccess),
    ("could not read from remote repository", ErrorClass::RemoteAccess),
    (
        "server does not allow request for unadvertised object",
        ErrorClass::RemoteAccess,
    ),
];

/// Classifies raw stderr text from the git process.
///
/// Unknown failures classify as `Fatal`; the retry predicate treats only
/// `Transient` (and timeouts) as recoverable.
pub fn classify_stderr(stderr: &str) -> ErrorClass {
    let lower = stderr.to_lowercase();

    // "Entry '<path>' not uptodate. Cannot merge." has a variable middle,
    // so it cannot live in the substring table.
    if lower.contains("entry '") && lower.contains("' not uptodate. cannot merge.") {
        return ErrorClass::OutdatedIndex;
    }

    for (pattern, class) in CLASS_PATTERNS {
        if lower.contains(pattern) {
            return *class;
        }
    }
    ErrorClass::Fatal
}

impl GitError {
    /// Returns the classification driving retry and fallback decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            GitError::IdleTimeout { .. } => ErrorClass::Transient,
            GitError::Interrupted { .. } => ErrorClass::Cancelled,
            GitError::Failed { stderr, .. } => classify_stderr(stderr),
            GitError::CorruptedIndex { .. } => ErrorClass::CorruptedIndex,
            GitError::OutdatedIndex(_) => ErrorClass::OutdatedIndex,
            GitError::ConnectionCheck { .. } => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    /// Builds the typed error for a non-zero exit, upgrading index-related
    /// failures to their dedicated variants so callers can trigger
    /// repository-level recovery instead of retrying
    pub fn from_failure(
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
        repo_dir: &Path,
    ) -> GitError {
        match classify_stderr(&stderr) {
            ErrorClass::CorruptedIndex => GitError::CorruptedIndex {
                index: repo_dir.join(".git").join("index"),
                message: stderr,
            },
            ErrorClass::OutdatedIndex => GitError::OutdatedIndex(stderr),
            _ => GitError::Failed {
                command,
                code,
                stdout,
                stderr,
            },
        }
    }
}

/// Retry predicate used by the executor: whether another attempt may
/// succeed where this one failed
pub fn is_recoverable(err: &GitError, attempt: u32, max_attempts: u32) -> bool {
    let attempts_left = attempt < max_attempts;
    match err.class() {
        ErrorClass::Transient => attempts_left,
        ErrorClass::SslTrust => false, // handled by the SSL fallback, not plain retry
        ErrorClass::Authentication
        | ErrorClass::RemoteRefNotFound
        | ErrorClass::RemoteAccess
        | ErrorClass::OutOfMemory
        | ErrorClass::CorruptedIndex
        | ErrorClass::OutdatedIndex
        | ErrorClass::Cancelled
        | ErrorClass::Fatal => false,
    }
}
