//! Git testing utilities

use anyhow::Result;
use std::path::Path;
use std::process::Command;

/// Checks if git is available in the system
pub fn is_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn run(path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(path).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Initializes a bare repository, the shape used for both local mirrors
/// and the "remote" side of fetch/push tests
pub fn init_bare(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    run(path, &["init", "--bare", "--initial-branch=main"])?;
    Ok(())
}

/// Sets up a work repository with user config and signing disabled
pub fn setup_work_repo(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    run(path, &["init", "--initial-branch=main"])?;
    run(path, &["config", "user.name", "Test User"])?;
    run(path, &["config", "user.email", "test@example.com"])?;
    run(path, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

/// Creates a commit and returns its id
pub fn commit_file(path: &Path, file_name: &str, content: &str, message: &str) -> Result<String> {
    std::fs::write(path.join(file_name), content)?;
    run(path, &["add", file_name])?;
    run(path, &["commit", "-m", message])?;
    run(path, &["rev-parse", "HEAD"])
}

/// Resolves a revision, or `None` when it does not exist
pub fn rev_parse(path: &Path, rev: &str) -> Option<String> {
    run(path, &["rev-parse", "--verify", rev]).ok()
}

/// Points `ref_name` at `revision` (or deletes it when `revision` is None)
pub fn update_ref(path: &Path, ref_name: &str, revision: Option<&str>) -> Result<()> {
    match revision {
        Some(revision) => run(path, &["update-ref", ref_name, revision])?,
        None => run(path, &["update-ref", "-d", ref_name])?,
    };
    Ok(())
}

/// Pushes a work repository's ref into a bare repository, bypassing the
/// crate under test; used to arrange remote-side state
pub fn seed_remote(work: &Path, bare: &Path, refspec: &str) -> Result<()> {
    run(
        work,
        &["push", &bare.display().to_string(), refspec],
    )?;
    Ok(())
}
