//! # gitexec
//!
//! `gitexec` is the native Git command execution and transport-negotiation
//! layer of a build-orchestration product: it turns logical operations
//! (fetch, push, tag, ls-remote) into authenticated, retried,
//! timeout-bounded invocations of the external `git` binary.
//!
//! ## Core Features
//!
//! - **Process control**: line-aware output streaming, idle timeouts,
//!   cross-task interruption, guaranteed post-run cleanup.
//! - **Auth injection**: ask-pass helpers, `GIT_SSH_COMMAND` key files,
//!   credential-helper suppression, proxy environment.
//! - **Failure negotiation**: bounded transient retry, two-phase SSL
//!   trust fallback through a merged certificate bundle, ref-spec
//!   narrowing against the remote's advertised refs.
//! - **Consistency**: prune-before-fetch, ref rollback on failed pushes,
//!   tag create/publish atomicity.
//! - **Caching**: single-flight change-computation cache with
//!   size-weighted eviction.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gitexec::auth::AuthSettings;
//! use gitexec::config::PluginConfig;
//! use gitexec::ops::{FetchSettings, GitRepoOps};
//! use gitexec::refspec::FetchMode;
//! use gitexec::repository::RepoHandle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gitexec::GitError> {
//!     let ops = GitRepoOps::new(PluginConfig::default());
//!     let repo = RepoHandle::new(
//!         "/work/repo",
//!         "https://host/repo.git",
//!         AuthSettings::anonymous(),
//!     );
//!     ops.fetch(&repo, &FetchSettings::new(FetchMode::AllRefsExceptTags)).await
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod ops;
pub mod process;
pub mod refspec;
pub mod repository;
pub mod retry;
pub mod ssl;
pub mod telemetry;
pub mod version;

pub use error::{ErrorClass, GitError};
pub use ops::{select_transport, GitRepoOps, Transport, VcsTransport};
pub use repository::RepoHandle;
