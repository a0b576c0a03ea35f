//! Historical change index: one changed-line set per commit.

use std::future::Future;
use std::path::Path;

use blamescope_core::{BlamescopeError, ChangeSet, HistoryOrder};
use blamescope_difflens::parser::parse_changed_lines;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::mining::CommitInfo;

/// A commit and the lines it changed relative to its parent(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit metadata.
    #[serde(flatten)]
    pub commit: CommitInfo,
    /// Lines added by the commit, in its own new-revision numbering.
    pub changed_lines: ChangeSet,
    /// The diff could not be fetched; `changed_lines` is empty for that reason.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fetch_failed: bool,
}

/// Commits in enumeration order with their change sets.
///
/// Persisted as `git_history.json`.
///
/// # Examples
///
/// ```
/// use blamescope_gitpulse::index::ChangeIndex;
///
/// let index = ChangeIndex::default();
/// assert!(index.is_empty());
/// assert_eq!(index.failed_commits, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeIndex {
    /// Order the commits were enumerated in.
    #[serde(default)]
    pub order: HistoryOrder,
    /// Commits whose diff could not be fetched.
    #[serde(default)]
    pub failed_commits: usize,
    /// One record per enumerated commit.
    pub commits: Vec<CommitRecord>,
}

impl ChangeIndex {
    /// Number of commits in the index.
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Whether the index holds no commits.
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Read an index saved by [`ChangeIndex::save`].
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::FileNotFound`] if `path` does not exist and
    /// [`BlamescopeError::MalformedInput`] if it is not a change index.
    pub fn load(path: &Path) -> Result<Self, BlamescopeError> {
        if !path.exists() {
            return Err(BlamescopeError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| BlamescopeError::MalformedInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the index as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), BlamescopeError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Build a change index by fetching and parsing every commit's diff.
///
/// At most `workers` fetches run at once. Records come back in the order of
/// `commits` regardless of which fetch finishes first. A fetch that yields
/// `None` produces an empty record flagged `fetch_failed` and counted in
/// [`ChangeIndex::failed_commits`]; the rest of the batch continues.
///
/// Dropping the returned future cancels the build and discards every
/// record produced so far.
///
/// # Examples
///
/// ```
/// use blamescope_core::HistoryOrder;
/// use blamescope_gitpulse::index::build_change_index;
/// use blamescope_gitpulse::mining::CommitInfo;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let commits = vec![CommitInfo {
///     hash: "abc".into(),
///     author_name: "alice".into(),
///     author_email: "alice@example.com".into(),
///     date: String::new(),
///     message: "add line".into(),
/// }];
/// let index = rt.block_on(build_change_index(commits, HistoryOrder::NewestFirst, 4, |_hash| async {
///     Some("--- a/x\n+++ b/x\n@@ -1 +1,2 @@\n a\n+b\n".to_string())
/// }));
/// assert_eq!(index.commits[0].changed_lines.lines("x"), Some(&[2][..]));
/// ```
pub async fn build_change_index<F, Fut>(
    commits: Vec<CommitInfo>,
    order: HistoryOrder,
    workers: usize,
    fetch: F,
) -> ChangeIndex
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let records: Vec<CommitRecord> = stream::iter(commits)
        .map(|commit| {
            let diff = fetch(commit.hash.clone());
            async move {
                match diff.await {
                    Some(text) => CommitRecord {
                        changed_lines: parse_changed_lines(&text),
                        commit,
                        fetch_failed: false,
                    },
                    None => {
                        log::warn!("no diff for commit {}; recording no changes", commit.hash);
                        CommitRecord {
                            commit,
                            changed_lines: ChangeSet::new(),
                            fetch_failed: true,
                        }
                    }
                }
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    let failed_commits = records.iter().filter(|r| r.fetch_failed).count();
    log::info!(
        "indexed {} commits ({} without a diff)",
        records.len(),
        failed_commits
    );

    ChangeIndex {
        order,
        failed_commits,
        commits: records,
    }
}
