//! Bounded-time invocations of the `git` command line.
//!
//! Everything git2 cannot express (patch text with git's own diff
//! settings, `blame --line-porcelain`, `log -L`) goes through [`GitCli`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use blamescope_core::{BlamescopeError, MergeParents};
use tokio::process::Command;

/// Captured result of a finished git process.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Whether git exited with status 0.
    pub success: bool,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Runs git in a fixed working directory with a per-call timeout.
///
/// Child processes are killed when the call times out or its future is
/// dropped, so cancelling a caller never leaves git running.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use blamescope_gitpulse::git::GitCli;
///
/// let git = GitCli::new(".", Duration::from_secs(30));
/// assert_eq!(git.timeout(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    /// Create a runner for the repository (or any directory inside it) at `workdir`.
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Directory git runs in.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Per-invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `git <args>` and capture its output, whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::Git`] if git cannot be spawned and
    /// [`BlamescopeError::Timeout`] if it runs longer than the timeout.
    pub async fn output(&self, args: &[&str]) -> Result<GitOutput, BlamescopeError> {
        let command = format!("git {}", args.join(" "));
        log::debug!("running `{command}` in {}", self.workdir.display());

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| BlamescopeError::Timeout {
                command: command.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| BlamescopeError::Git(format!("failed to run `{command}`: {e}")))?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run `git <args>` and return stdout, or `None` if git is unavailable,
    /// fails, or times out. Failures are logged, never raised.
    pub async fn run(&self, args: &[&str]) -> Option<String> {
        match self.output(args).await {
            Ok(out) if out.success => Some(out.stdout),
            Ok(out) => {
                log::warn!(
                    "`git {}` exited with an error: {}",
                    args.join(" "),
                    out.stderr.trim()
                );
                None
            }
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }

    /// Patch text of `rev` relative to its parent(s), as consumed by
    /// [`parse_changed_lines`](blamescope_difflens::parser::parse_changed_lines).
    ///
    /// Root commits diff against the empty tree. Merge commits follow
    /// `merge_parents`: the first parent only, or one section per parent.
    /// Prefixes are pinned to `a/`/`b/` whatever `diff.noprefix` or
    /// `diff.mnemonicPrefix` say.
    pub async fn commit_diff(&self, rev: &str, merge_parents: MergeParents) -> Option<String> {
        let merges = match merge_parents {
            MergeParents::First => "--diff-merges=first-parent",
            MergeParents::Union => "--diff-merges=separate",
        };
        self.run(&[
            "show",
            "--format=",
            "--patch",
            "--no-color",
            "--no-ext-diff",
            "--src-prefix=a/",
            "--dst-prefix=b/",
            merges,
            rev,
        ])
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use blamescope_difflens::parser::parse_changed_lines;
    use git2::{Commit, Oid, Repository, Signature, Time};

    pub(crate) fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Write `content` to `file`, stage it and commit on top of `parents`.
    /// `update_ref` is `Some("HEAD")` for the checked-out branch.
    fn commit_file(
        repo: &Repository,
        file: &str,
        content: &str,
        update_ref: Option<&str>,
        parents: &[&Commit<'_>],
    ) -> Oid {
        let workdir = repo.workdir().unwrap();
        let path = workdir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::new("alice", "alice@example.com", &Time::new(1_700_000_000, 0)).unwrap();
        repo.commit(update_ref, &sig, &sig, "change", &tree, parents)
            .unwrap()
    }

    /// `base` on the root commit, `main` appended on HEAD, `side` rewriting
    /// line 1 on a detached commit, and a merge of the two.
    fn merge_repo() -> (tempfile::TempDir, Oid, Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let root = commit_file(&repo, "f.txt", "a\nb\nc\n", Some("HEAD"), &[]);
        let root_commit = repo.find_commit(root).unwrap();
        let side = commit_file(&repo, "f.txt", "side\nb\nc\n", None, &[&root_commit]);
        let main = commit_file(&repo, "f.txt", "a\nb\nc\nmain\n", Some("HEAD"), &[&root_commit]);
        let (side, main) = (repo.find_commit(side).unwrap(), repo.find_commit(main).unwrap());
        let merge = commit_file(
            &repo,
            "f.txt",
            "side\nb\nc\nmain\n",
            Some("HEAD"),
            &[&main, &side],
        );
        (dir, root, merge)
    }

    async fn changed_lines(dir: &Path, rev: &str, merge_parents: MergeParents) -> serde_json::Value {
        let git = GitCli::new(dir, Duration::from_secs(30));
        let patch = git.commit_diff(rev, merge_parents).await.unwrap();
        serde_json::to_value(parse_changed_lines(&patch)).unwrap()
    }

    #[tokio::test]
    async fn run_outside_a_repository_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path(), Duration::from_secs(10));
        assert!(git.run(&["rev-parse", "HEAD"]).await.is_none());
    }

    #[tokio::test]
    async fn missing_workdir_is_none() {
        let git = GitCli::new("/definitely/not/a/dir", Duration::from_secs(10));
        assert!(git.run(&["status"]).await.is_none());
    }

    #[tokio::test]
    async fn root_commit_diff_adds_every_line() {
        if !git_available() {
            return;
        }
        let (dir, root, _) = merge_repo();
        let lines = changed_lines(dir.path(), &root.to_string(), MergeParents::First).await;
        assert_eq!(lines, serde_json::json!({ "f.txt": [1, 2, 3] }));
    }

    #[tokio::test]
    async fn merge_diff_against_first_parent() {
        if !git_available() {
            return;
        }
        let (dir, _, merge) = merge_repo();
        let lines = changed_lines(dir.path(), &merge.to_string(), MergeParents::First).await;
        assert_eq!(lines, serde_json::json!({ "f.txt": [1] }));
    }

    #[tokio::test]
    async fn merge_diff_unions_every_parent() {
        if !git_available() {
            return;
        }
        let (dir, _, merge) = merge_repo();
        let lines = changed_lines(dir.path(), &merge.to_string(), MergeParents::Union).await;
        assert_eq!(lines, serde_json::json!({ "f.txt": [1, 4] }));
    }

    #[tokio::test]
    async fn diff_paths_ignore_prefix_config() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_bool("diff.noprefix", true).unwrap();
        config.set_bool("diff.mnemonicPrefix", true).unwrap();
        commit_file(&repo, "a/x.txt", "one\n", Some("HEAD"), &[]);

        let lines = changed_lines(dir.path(), "HEAD", MergeParents::First).await;
        assert_eq!(lines, serde_json::json!({ "a/x.txt": [1] }));
    }
}
