//! Local repository operations against a real git

mod common;

use common::{commit_file, is_git_available, setup_work_repo};

use gitexec::auth::AuthSettings;
use gitexec::ops::{ConfigScope, GitRepoOps};
use gitexec::repository::RepoHandle;

fn ops() -> GitRepoOps {
    GitRepoOps::new(common::test_config())
}

#[tokio::test]
async fn test_init_fresh_repository() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh");
    std::fs::create_dir_all(&path).unwrap();

    let result = ops().init(&path, false, Some("main")).await.unwrap();
    assert!(!result.existing);
    assert_eq!(result.branch.as_deref(), Some("main"));
    assert!(path.join(".git").exists());
}

#[tokio::test]
async fn test_init_reports_existing_repository() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();
    commit_file(dir.path(), "a.txt", "one", "first").unwrap();
    std::fs::write(dir.path().join("a.txt"), "modified").unwrap();

    let result = ops().init(dir.path(), false, None).await.unwrap();
    assert!(result.existing);
    assert_eq!(result.branch.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_status_lists_modified_files() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();
    commit_file(dir.path(), "tracked.txt", "one", "first").unwrap();
    std::fs::write(dir.path().join("tracked.txt"), "changed").unwrap();
    std::fs::write(dir.path().join("untracked.txt"), "new").unwrap();

    let status = ops().status(dir.path()).await.unwrap();
    assert_eq!(status.branch.as_deref(), Some("main"));
    assert!(status.modified.contains(&"tracked.txt".to_string()));
    assert!(status.modified.contains(&"untracked.txt".to_string()));
}

#[tokio::test]
async fn test_config_set_and_unset() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();

    let ops = ops();
    ops.set_config(dir.path(), ConfigScope::Local, "core.sparsecheckout", "true")
        .await
        .unwrap();
    let value = std::process::Command::new("git")
        .args(["config", "core.sparsecheckout"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&value.stdout).trim(), "true");

    ops.unset_config(dir.path(), ConfigScope::Local, "core.sparsecheckout")
        .await
        .unwrap();
    let value = std::process::Command::new("git")
        .args(["config", "core.sparsecheckout"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&value.stdout).trim().is_empty());
}

#[tokio::test]
async fn test_add_and_commit() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();
    commit_file(dir.path(), "base.txt", "base", "base commit").unwrap();
    std::fs::write(dir.path().join("feature.txt"), "feature").unwrap();

    let ops = ops();
    ops.add(dir.path(), &["feature.txt".to_string()]).await.unwrap();
    ops.commit(
        dir.path(),
        "add feature file",
        Some("Build Agent <agent@example.com>"),
    )
    .await
    .unwrap();

    let status = ops.status(dir.path()).await.unwrap();
    assert!(status.modified.is_empty());
}

#[tokio::test]
async fn test_fsck_exit_code_on_healthy_repo() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();
    commit_file(dir.path(), "a.txt", "one", "first").unwrap();

    assert_eq!(ops().fsck(dir.path()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_changed_paths_and_commits_by_paths() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();
    let base = commit_file(dir.path(), "a.txt", "one", "first").unwrap();
    commit_file(dir.path(), "b.txt", "two", "second").unwrap();
    let head = commit_file(dir.path(), "c.txt", "three", "third").unwrap();

    let ops = ops();
    let repo = RepoHandle::new(dir.path(), "file://unused", AuthSettings::anonymous());

    let paths = ops
        .changed_paths(&repo, &head, &[base.clone()])
        .await
        .unwrap();
    assert_eq!(paths, vec!["b.txt".to_string(), "c.txt".to_string()]);

    let commits = ops
        .commits_by_paths(&repo, &head, &[base], 10, &["c.txt".to_string()])
        .await
        .unwrap();
    assert_eq!(commits, vec![head]);
}

#[tokio::test]
async fn test_repack_runs() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    setup_work_repo(dir.path()).unwrap();
    commit_file(dir.path(), "a.txt", "one", "first").unwrap();

    ops().repack(dir.path()).await.unwrap();
}
