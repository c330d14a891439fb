//! Push rollback and tag atomicity against real repositories

mod common;

use common::{commit_file, init_bare, is_git_available, rev_parse, setup_work_repo, update_ref};

use gitexec::auth::AuthSettings;
use gitexec::ops::{GitRepoOps, TagSettings};
use gitexec::repository::RepoHandle;

struct Setup {
    _dir: tempfile::TempDir,
    work: std::path::PathBuf,
    bare: std::path::PathBuf,
    first: String,
    second: String,
}

/// Work repo with two commits, `main` reset to the first; the bare remote
/// holds the first commit
fn setup() -> anyhow::Result<Setup> {
    let dir = tempfile::tempdir()?;
    let work = dir.path().join("work");
    let bare = dir.path().join("origin.git");
    setup_work_repo(&work)?;
    init_bare(&bare)?;

    let first = commit_file(&work, "a.txt", "one", "first commit")?;
    common::seed_remote(&work, &bare, "refs/heads/main:refs/heads/main")?;
    let second = commit_file(&work, "b.txt", "two", "second commit")?;
    // detach HEAD so refs/heads/main can be moved freely
    std::process::Command::new("git")
        .args(["checkout", "--detach", &second])
        .current_dir(&work)
        .output()?;
    update_ref(&work, "refs/heads/main", Some(&first))?;

    Ok(Setup {
        _dir: dir,
        work,
        bare,
        first,
        second,
    })
}

fn tagger() -> Option<(String, String)> {
    Some(("Test User".to_string(), "test@example.com".to_string()))
}

#[tokio::test]
async fn test_push_advances_local_ref_and_remote() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let s = setup().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = RepoHandle::new(
        &s.work,
        s.bare.display().to_string(),
        AuthSettings::anonymous(),
    );

    ops.push(&repo, "main", &s.second, &s.first).await.unwrap();

    assert_eq!(rev_parse(&s.work, "refs/heads/main").unwrap(), s.second);
    assert_eq!(rev_parse(&s.bare, "refs/heads/main").unwrap(), s.second);
}

#[tokio::test]
async fn test_failed_push_restores_local_ref() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let s = setup().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    // push URL points nowhere, so the push itself must fail
    let repo = RepoHandle::new(
        &s.work,
        s.bare.display().to_string(),
        AuthSettings::anonymous(),
    )
    .with_push_url("/nonexistent/push/target.git");

    let err = ops.push(&repo, "main", &s.second, &s.first).await;
    assert!(err.is_err());

    // the local ref was advanced, then rolled back
    assert_eq!(rev_parse(&s.work, "refs/heads/main").unwrap(), s.first);
    assert_eq!(rev_parse(&s.bare, "refs/heads/main").unwrap(), s.first);
}

#[tokio::test]
async fn test_tag_publishes_local_and_remote() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let s = setup().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = RepoHandle::new(
        &s.work,
        s.bare.display().to_string(),
        AuthSettings::anonymous(),
    );

    let settings = TagSettings {
        name: "build-1".to_string(),
        message: "pinned by build 1".to_string(),
        commit: s.second.clone(),
        tagger: tagger(),
    };
    let name = ops.tag(&repo, &settings).await.unwrap();
    assert_eq!(name, "build-1");

    // annotated local tag, remote tag peeling to the tagged commit
    assert!(rev_parse(&s.work, "refs/tags/build-1").is_some());
    let remote_refs = ops.ls_remote(&repo).await.unwrap();
    assert_eq!(remote_refs["refs/tags/build-1"], s.second);
}

#[tokio::test]
async fn test_tag_replaces_existing_remote_tag() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let s = setup().unwrap();
    let ops = GitRepoOps::new(common::test_config());
    let repo = RepoHandle::new(
        &s.work,
        s.bare.display().to_string(),
        AuthSettings::anonymous(),
    );

    let mut settings = TagSettings {
        name: "release".to_string(),
        message: "first cut".to_string(),
        commit: s.first.clone(),
        tagger: tagger(),
    };
    ops.tag(&repo, &settings).await.unwrap();

    // re-tag the same name onto another commit: the remote tag must be
    // deleted first because tags are not fast-forwarded
    settings.commit = s.second.clone();
    settings.message = "second cut".to_string();
    ops.tag(&repo, &settings).await.unwrap();

    let remote_refs = ops.ls_remote(&repo).await.unwrap();
    assert_eq!(remote_refs["refs/tags/release"], s.second);
}

#[tokio::test]
async fn test_failed_tag_push_deletes_local_tag() {
    if !is_git_available() {
        eprintln!("git not available - skipping");
        return;
    }
    let s = setup().unwrap();

    // the remote answers ls-remote but rejects every push
    let hook = s.bare.join("hooks").join("pre-receive");
    std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let ops = GitRepoOps::new(common::test_config());
    let repo = RepoHandle::new(
        &s.work,
        s.bare.display().to_string(),
        AuthSettings::anonymous(),
    );

    let settings = TagSettings {
        name: "doomed".to_string(),
        message: "never lands".to_string(),
        commit: s.second.clone(),
        tagger: tagger(),
    };
    let result = ops.tag(&repo, &settings).await;
    assert!(result.is_err());

    // local and remote stay consistent: no tag anywhere
    assert!(rev_parse(&s.work, "refs/tags/doomed").is_none());
    assert!(rev_parse(&s.bare, "refs/tags/doomed").is_none());
}
