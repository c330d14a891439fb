//! Fetch, prune and ls-remote against real repositories

mod common;

use common::{commit_file, init_bare, is_git_available, rev_parse, seed_remote, setup_work_repo};

use gitexec::auth::AuthSettings;
use gitexec::ops::{FetchSettings, GitRepoOps};
use gitexec::refspec::{FetchMode, RefSpec};
use gitexec::repository::RepoHandle;

struct Remote {
    _dir: tempfile::TempDir,
    work: std::path::PathBuf,
    bare: std::path::PathBuf,
}

/// A bare "remote" seeded from a scratch work repository
fn remote_with_history() -> anyhow::Result<(Remote, String)> {
    let dir = tempfile::tempdir()?;
    let work = dir.path().join("work");
    let bare = dir.path().join("origin.git");
    setup_work_repo(&work)?;
    init_bare(&bare)?;
    let head = commit_file(&work, "README.md", "# hello", "initial commit")?;
    seed_remote(&work, &bare, "refs/heads/main:refs/heads/main")?;
    Ok((
        Remote {
            _dir: dir,
            work,
            bare,
        },
        head,
    ))
}

fn mirror() -> anyhow::Result<(tempfile::TempDir, std::path::PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mirror.git");
    init_bare(&path)?;
    Ok((dir, path))
}

fn handle(mirror: &std::path::Path, remote: &std::path::Path) -> RepoHandle {
    RepoHandle::new(
        mirror,
        remote.display().to_string(),
        AuthSettings::anonymous(),
    )
}

#[tokio::test]
async fn test_fetch_all_refs() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let (remote, head) = remote_with_history().unwrap();
    let (_dir, mirror) = mirror().unwrap();

    let ops = GitRepoOps::new(common::test_config());
    let repo = handle(&mirror, &remote.bare);
    ops.fetch(&repo, &FetchSettings::new(FetchMode::AllRefs))
        .await
        .unwrap();

    assert_eq!(rev_parse(&mirror, "refs/heads/main").unwrap(), head);
}

#[tokio::test]
async fn test_fetch_all_refs_except_tags_skips_tags() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let (remote, head) = remote_with_history().unwrap();
    // tag on the remote side
    std::process::Command::new("git")
        .args(["tag", "v1"])
        .current_dir(&remote.work)
        .output()
        .unwrap();
    seed_remote(&remote.work, &remote.bare, "refs/tags/v1:refs/tags/v1").unwrap();

    let (_dir, mirror) = mirror().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = handle(&mirror, &remote.bare);
    ops.fetch(&repo, &FetchSettings::new(FetchMode::AllRefsExceptTags))
        .await
        .unwrap();

    assert_eq!(rev_parse(&mirror, "refs/heads/main").unwrap(), head);
    assert!(rev_parse(&mirror, "refs/tags/v1").is_none());
}

#[tokio::test]
async fn test_fetch_explicit_specs_narrows_vanished_refs() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let (remote, _head) = remote_with_history().unwrap();
    for branch in ["b1", "b2", "b3"] {
        std::process::Command::new("git")
            .args(["branch", branch])
            .current_dir(&remote.work)
            .output()
            .unwrap();
        seed_remote(
            &remote.work,
            &remote.bare,
            &format!("refs/heads/{branch}:refs/heads/{branch}"),
        )
        .unwrap();
    }
    // b2 disappears from the remote (e.g. renamed)
    common::update_ref(&remote.bare, "refs/heads/b2", None).unwrap();

    let (_dir, mirror) = mirror().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = handle(&mirror, &remote.bare);

    let mode = FetchMode::RefSpecs(vec![
        RefSpec::forced("refs/heads/b1"),
        RefSpec::forced("refs/heads/b2"),
        RefSpec::forced("refs/heads/b3"),
    ]);
    ops.fetch(&repo, &FetchSettings::new(mode)).await.unwrap();

    assert!(rev_parse(&mirror, "refs/heads/b1").is_some());
    assert!(rev_parse(&mirror, "refs/heads/b2").is_none());
    assert!(rev_parse(&mirror, "refs/heads/b3").is_some());
}

#[tokio::test]
async fn test_fetch_all_specs_vanished_is_nothing_to_fetch() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let (remote, _head) = remote_with_history().unwrap();

    let (_dir, mirror) = mirror().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = handle(&mirror, &remote.bare);

    // both requested branches never existed upstream
    let mode = FetchMode::RefSpecs(vec![
        RefSpec::forced("refs/heads/gone-1"),
        RefSpec::forced("refs/heads/gone-2"),
    ]);
    ops.fetch(&repo, &FetchSettings::new(mode)).await.unwrap();
    assert!(rev_parse(&mirror, "refs/heads/gone-1").is_none());
}

#[tokio::test]
async fn test_ls_remote_peels_annotated_tags() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let (remote, head) = remote_with_history().unwrap();
    std::process::Command::new("git")
        .args(["tag", "-a", "-m", "release", "v1"])
        .current_dir(&remote.work)
        .env("GIT_COMMITTER_NAME", "Test User")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    seed_remote(&remote.work, &remote.bare, "refs/tags/v1:refs/tags/v1").unwrap();

    let (_dir, mirror) = mirror().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = handle(&mirror, &remote.bare);

    let refs = ops.ls_remote(&repo).await.unwrap();
    // the tag entry must carry the peeled commit, not the tag object
    assert_eq!(refs["refs/tags/v1"], head);
    assert_eq!(refs["refs/heads/main"], head);
}

#[tokio::test]
async fn test_fetch_records_duration_telemetry() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let (remote, _head) = remote_with_history().unwrap();
    let (_dir, mirror) = mirror().unwrap();

    let ops = GitRepoOps::new(common::test_config());
    let repo = handle(&mirror, &remote.bare);
    ops.fetch(&repo, &FetchSettings::new(FetchMode::AllRefs))
        .await
        .unwrap();

    let stats = ops.telemetry().stats("fetch", None).unwrap();
    assert_eq!(stats.invocations, 1);
    assert_eq!(stats.failures, 0);
    assert!(ops.telemetry().stats("prune", None).is_some());
}
