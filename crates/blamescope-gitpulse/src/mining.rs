//! Commit enumeration via git2.
//!
//! Lists the commits a change index is built over and reads HEAD metadata
//! for single-commit change reports.

use std::path::Path;

use blamescope_core::{BlamescopeError, HistoryConfig, HistoryOrder};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use git2::{Repository, Sort};
use serde::{Deserialize, Serialize};

/// Commit metadata as listed by the history walk.
///
/// # Examples
///
/// ```
/// use blamescope_gitpulse::mining::CommitInfo;
///
/// let info = CommitInfo {
///     hash: "4f1c2d3e".into(),
///     author_name: "alice".into(),
///     author_email: "alice@example.com".into(),
///     date: "Mon Jan 1 00:00:00 2024 +0000".into(),
///     message: "fix: auth bug".into(),
/// };
/// assert_eq!(info.author_name, "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit hash.
    pub hash: String,
    /// Author name.
    pub author_name: String,
    /// Author email.
    pub author_email: String,
    /// Author date in the author's timezone, display only.
    pub date: String,
    /// First line of the commit message.
    pub message: String,
}

/// Metadata of the commit a single-commit report describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    /// Full commit hash.
    pub commit_hash: Option<String>,
    /// Author name.
    pub commit_author_name: Option<String>,
    /// Author email.
    pub commit_author_email: Option<String>,
    /// First line of the commit message.
    pub commit_message: Option<String>,
}

/// Options for the history walk.
///
/// # Examples
///
/// ```
/// use blamescope_gitpulse::mining::WalkOptions;
/// use blamescope_core::HistoryOrder;
///
/// let opts = WalkOptions::default();
/// assert_eq!(opts.order, HistoryOrder::NewestFirst);
/// assert!(opts.max_commits.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Order of the returned commits.
    pub order: HistoryOrder,
    /// Keep only the most recent N commits.
    pub max_commits: Option<usize>,
    /// Branch to walk (default: HEAD).
    pub branch: Option<String>,
}

impl From<&HistoryConfig> for WalkOptions {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            order: config.order,
            max_commits: config.max_commits,
            branch: config.branch.clone(),
        }
    }
}

/// List commits reachable from HEAD (or `options.branch`).
///
/// Commits are time-sorted newest first, truncated to `max_commits`, then
/// reversed when `order` is oldest first, so a limit always keeps the most
/// recent history.
///
/// # Errors
///
/// Returns [`BlamescopeError::Git`] if the repository cannot be opened or walked.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use blamescope_gitpulse::mining::{list_commits, WalkOptions};
///
/// let commits = list_commits(Path::new("."), &WalkOptions::default()).unwrap();
/// for c in &commits {
///     println!("{}: {} ({})", &c.hash[..7], c.message, c.author_name);
/// }
/// ```
pub fn list_commits(
    repo_path: &Path,
    options: &WalkOptions,
) -> Result<Vec<CommitInfo>, BlamescopeError> {
    let repo = open(repo_path)?;

    let mut revwalk = repo
        .revwalk()
        .map_err(|e| BlamescopeError::Git(format!("failed to create revwalk: {e}")))?;
    revwalk
        .set_sorting(Sort::TIME)
        .map_err(|e| BlamescopeError::Git(format!("failed to sort revwalk: {e}")))?;

    if let Some(ref branch) = options.branch {
        let reference = repo.resolve_reference_from_short_name(branch).map_err(|e| {
            BlamescopeError::Git(format!("failed to resolve branch '{branch}': {e}"))
        })?;
        let oid = reference
            .target()
            .ok_or_else(|| BlamescopeError::Git("branch has no target".into()))?;
        revwalk
            .push(oid)
            .map_err(|e| BlamescopeError::Git(format!("failed to push oid: {e}")))?;
    } else {
        revwalk
            .push_head()
            .map_err(|e| BlamescopeError::Git(format!("failed to push HEAD: {e}")))?;
    }

    let limit = options.max_commits.unwrap_or(usize::MAX);
    let mut commits = Vec::new();

    for oid_result in revwalk.take(limit) {
        let oid = oid_result.map_err(|e| BlamescopeError::Git(format!("revwalk error: {e}")))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| BlamescopeError::Git(format!("failed to find commit: {e}")))?;
        commits.push(commit_info(&commit));
    }

    if options.order == HistoryOrder::OldestFirst {
        commits.reverse();
    }

    Ok(commits)
}

/// Metadata of the commit HEAD points at.
///
/// # Errors
///
/// Returns [`BlamescopeError::Git`] if the repository cannot be opened or
/// has no commits.
pub fn head_info(repo_path: &Path) -> Result<GitInfo, BlamescopeError> {
    let repo = open(repo_path)?;
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| BlamescopeError::Git(format!("failed to resolve HEAD: {e}")))?;
    let info = commit_info(&commit);
    Ok(GitInfo {
        commit_hash: Some(info.hash),
        commit_author_name: Some(info.author_name),
        commit_author_email: Some(info.author_email),
        commit_message: Some(info.message),
    })
}

fn open(repo_path: &Path) -> Result<Repository, BlamescopeError> {
    Repository::discover(repo_path)
        .map_err(|e| BlamescopeError::Git(format!("failed to open repository: {e}")))
}

fn commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
    let author = commit.author();
    CommitInfo {
        hash: commit.id().to_string(),
        author_name: author.name().unwrap_or("unknown").to_string(),
        author_email: author.email().unwrap_or("unknown").to_string(),
        date: format_git_date(author.when()),
        message: commit.summary().unwrap_or("").to_string(),
    }
}

/// Render a signature time the way `git log` prints `%ad`.
fn format_git_date(when: git2::Time) -> String {
    let offset = FixedOffset::east_opt(when.offset_minutes() * 60).unwrap_or(Utc.fix());
    match DateTime::from_timestamp(when.seconds(), 0) {
        Some(utc) => utc
            .with_timezone(&offset)
            .format("%a %b %-d %H:%M:%S %Y %z")
            .to_string(),
        None => when.seconds().to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use git2::{Signature, Time};

    /// Create a repository with one commit per `(author, file, content)` entry.
    pub(crate) fn make_repo(commits: &[(&str, &str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        for (i, (author, file, content)) in commits.iter().enumerate() {
            std::fs::write(dir.path().join(file), content).unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new(file)).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let time = Time::new(1_700_000_000 + i as i64 * 60, 0);
            let sig = Signature::new(author, &format!("{author}@example.com"), &time).unwrap();
            let parents = match repo.head() {
                Ok(head) => vec![head.peel_to_commit().unwrap()],
                Err(_) => vec![],
            };
            let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
            repo.commit(
                Some("HEAD"),
                &sig,
                &sig,
                &format!("commit {i}\n\nbody"),
                &tree,
                &parent_refs,
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn walk_options_from_history_config() {
        let config = HistoryConfig {
            order: HistoryOrder::OldestFirst,
            max_commits: Some(3),
            ..HistoryConfig::default()
        };
        let opts = WalkOptions::from(&config);
        assert_eq!(opts.order, HistoryOrder::OldestFirst);
        assert_eq!(opts.max_commits, Some(3));
    }

    #[test]
    fn list_commits_newest_first_by_default() {
        let dir = make_repo(&[
            ("alice", "a.txt", "1\n"),
            ("bob", "a.txt", "1\n2\n"),
            ("carol", "b.txt", "x\n"),
        ]);
        let commits = list_commits(dir.path(), &WalkOptions::default()).unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].author_name, "carol");
        assert_eq!(commits[2].author_name, "alice");
        assert_eq!(commits[0].message, "commit 2");
        assert_eq!(commits[0].hash.len(), 40);
        assert_eq!(commits[1].author_email, "bob@example.com");
    }

    #[test]
    fn oldest_first_limit_keeps_most_recent() {
        let dir = make_repo(&[
            ("alice", "a.txt", "1\n"),
            ("bob", "a.txt", "2\n"),
            ("carol", "a.txt", "3\n"),
        ]);
        let opts = WalkOptions {
            order: HistoryOrder::OldestFirst,
            max_commits: Some(2),
            branch: None,
        };
        let commits = list_commits(dir.path(), &opts).unwrap();
        let authors: Vec<_> = commits.iter().map(|c| c.author_name.as_str()).collect();
        assert_eq!(authors, vec!["bob", "carol"]);
    }

    #[test]
    fn head_info_reads_latest_commit() {
        let dir = make_repo(&[("alice", "a.txt", "1\n"), ("bob", "a.txt", "2\n")]);
        let info = head_info(dir.path()).unwrap();
        assert_eq!(info.commit_author_name.as_deref(), Some("bob"));
        assert_eq!(info.commit_author_email.as_deref(), Some("bob@example.com"));
        assert_eq!(info.commit_message.as_deref(), Some("commit 1"));
    }

    #[test]
    fn not_a_repository_is_git_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_commits(dir.path(), &WalkOptions::default()).unwrap_err();
        assert!(matches!(err, BlamescopeError::Git(_)));
    }

    #[test]
    fn git_date_uses_author_offset() {
        let formatted = format_git_date(Time::new(1_700_000_000, 120));
        assert_eq!(formatted, "Wed Nov 15 00:13:20 2023 +0200");
    }
}
