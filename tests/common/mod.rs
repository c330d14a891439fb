//! Common test utilities and helpers
#![allow(dead_code, unused_imports)]

pub mod git;

pub use self::git::{
    commit_file, init_bare, is_git_available, rev_parse, seed_remote, setup_work_repo, update_ref,
};

use gitexec::config::PluginConfig;

/// Configuration tuned for tests: fast retries, short local timeouts
pub fn test_config() -> PluginConfig {
    PluginConfig::from_toml_str(
        r#"
        retry_initial_delay_ms = 1
        connection_retry_attempts = 1
        local_timeout_secs = 60
        "#,
    )
    .expect("test config parses")
}
