//! Short-lived helper files: ask-pass scripts and private key files
//!
//! Everything generated here is deleted by a post-action after the git
//! process exits; callers register the returned path for cleanup.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::error::GitError;

/// Writes an executable ask-pass script that prints `password` and nothing
/// else, the program git invokes instead of prompting on a terminal.
pub fn generate_ask_pass(password: &str) -> Result<PathBuf, GitError> {
    let mut file = Builder::new()
        .prefix("pass")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot create ask-pass script: {e}")))?;

    writeln!(file, "#!/bin/sh")
        .and_then(|_| writeln!(file, "printf '%s' {}", shell_quote(password)))
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot write ask-pass script: {e}")))?;

    let path = file
        .into_temp_path()
        .keep()
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot keep ask-pass script: {e}")))?;

    set_permissions(&path, 0o700)?;
    Ok(path)
}

/// Writes decrypted private key material to a key file `ssh` will accept:
/// LF line endings, trailing newline, permissions 600.
pub fn write_private_key(material: &[u8]) -> Result<PathBuf, GitError> {
    let text = String::from_utf8_lossy(material);
    let normalized = format!("{}\n", text.trim().replace("\r\n", "\n"));

    let mut file = Builder::new()
        .prefix("key")
        .tempfile()
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot create key file: {e}")))?;

    file.write_all(normalized.as_bytes())
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot write key file: {e}")))?;

    let path = file
        .into_temp_path()
        .keep()
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot keep key file: {e}")))?;

    set_permissions(&path, 0o600)?;
    Ok(path)
}

/// Deletes a generated helper file; used from post-actions where failures
/// can only be logged
pub fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete helper file");
        }
    }
}

// Single-quote for /bin/sh: close the quote, emit an escaped quote, reopen
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<(), GitError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| GitError::MissingAuthMaterial(format!("cannot restrict {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<(), GitError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_pass_prints_password_only() {
        let path = generate_ask_pass("s3cr3t").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "#!/bin/sh\nprintf '%s' 's3cr3t'\n");
        remove_quietly(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_ask_pass_quotes_hostile_passwords() {
        let path = generate_ask_pass("pa'ss $HOME `id`").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(r"'pa'\''ss $HOME `id`'"));
        remove_quietly(&path);
    }

    #[cfg(unix)]
    #[test]
    fn test_ask_pass_is_owner_executable_only() {
        use std::os::unix::fs::PermissionsExt;
        let path = generate_ask_pass("x").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        remove_quietly(&path);
    }

    #[test]
    fn test_key_file_normalizes_line_endings() {
        let path = write_private_key(b"-----BEGIN KEY-----\r\nabc\r\n-----END KEY-----").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "-----BEGIN KEY-----\nabc\n-----END KEY-----\n");
        remove_quietly(&path);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let path = write_private_key(b"key material").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        remove_quietly(&path);
    }
}
