//! Persisted CI reports: the HEAD change report and findings input.

use std::path::Path;

use blamescope_core::{BlamescopeError, ChangeSet, MergeParents};
use blamescope_difflens::parser::parse_changed_lines;
use blamescope_gitpulse::git::GitCli;
use blamescope_gitpulse::mining::{head_info, GitInfo};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlate::Finding;

/// GitHub Actions context of the current workflow run.
///
/// Every field is optional: outside CI, or for events without a payload,
/// the context is mostly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiContext {
    /// User who triggered the workflow.
    pub actor: Option<String>,
    /// Triggering event, e.g. `push` or `pull_request`.
    pub event_name: Option<String>,
    /// `owner/name` of the repository.
    pub repository: Option<String>,
    /// Git ref the workflow runs on.
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    /// Raw event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_payload: Option<Value>,
    /// Login of the pull request author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_creator: Option<String>,
    /// Pull request title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_title: Option<String>,
    /// Pull request number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    /// Name of the pusher for push events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pusher: Option<String>,
    /// Why the event payload could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_parsing_event: Option<String>,
}

impl CiContext {
    /// Read the context from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the context through `lookup`, which maps variable names to values.
    ///
    /// # Examples
    ///
    /// ```
    /// use blamescope_correlate::report::CiContext;
    ///
    /// let ctx = CiContext::from_lookup(|key| match key {
    ///     "GITHUB_ACTOR" => Some("octocat".to_string()),
    ///     "GITHUB_EVENT_NAME" => Some("push".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(ctx.actor.as_deref(), Some("octocat"));
    /// assert!(ctx.pusher.is_none());
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut ctx = Self {
            actor: lookup("GITHUB_ACTOR"),
            event_name: lookup("GITHUB_EVENT_NAME"),
            repository: lookup("GITHUB_REPOSITORY"),
            git_ref: lookup("GITHUB_REF"),
            ..Self::default()
        };

        let Some(event_path) = lookup("GITHUB_EVENT_PATH") else {
            return ctx;
        };
        let event_path = Path::new(&event_path);
        if !event_path.exists() {
            return ctx;
        }

        let payload: Value = match std::fs::read_to_string(event_path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("could not read event payload {}: {e}", event_path.display());
                ctx.error_parsing_event = Some(e);
                return ctx;
            }
        };

        match ctx.event_name.as_deref() {
            Some("pull_request") => {
                let pr = &payload["pull_request"];
                ctx.pr_creator = pr["user"]["login"].as_str().map(String::from);
                ctx.pr_title = pr["title"].as_str().map(String::from);
                ctx.pr_number = pr["number"].as_u64();
            }
            Some("push") => {
                ctx.pusher = payload["pusher"]["name"].as_str().map(String::from);
            }
            _ => {}
        }
        ctx.event_payload = Some(payload);
        ctx
    }
}

/// Change report for the commit at HEAD, exchanged with later CI steps as
/// `ci_git_report.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitReport {
    /// HEAD commit metadata.
    pub git_info: GitInfo,
    /// CI environment of the run.
    pub ci_context: CiContext,
    /// Lines added by HEAD.
    pub changed_lines: ChangeSet,
    /// Every file HEAD touched, deletions included.
    pub changed_files_list: Vec<String>,
}

impl GitReport {
    /// Build the report for HEAD of the repository containing `git.workdir()`.
    ///
    /// HEAD is diffed against its first parent. A missing diff yields an
    /// empty change set rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::Git`] if HEAD cannot be read.
    pub async fn for_head(git: &GitCli, ci_context: CiContext) -> Result<Self, BlamescopeError> {
        let git_info = head_info(git.workdir())?;

        let changed_lines = match git.commit_diff("HEAD", MergeParents::First).await {
            Some(diff) => parse_changed_lines(&diff),
            None => ChangeSet::new(),
        };
        let changed_files_list = git
            .run(&["diff-tree", "--no-commit-id", "--name-only", "-r", "--root", "HEAD"])
            .await
            .map(|out| out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        log::info!(
            "HEAD changes {} lines across {} files",
            changed_lines.line_count(),
            changed_lines.file_count()
        );

        Ok(Self {
            git_info,
            ci_context,
            changed_lines,
            changed_files_list,
        })
    }

    /// Read a report written by [`GitReport::save`] or another CI step.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::FileNotFound`] or
    /// [`BlamescopeError::MalformedInput`].
    pub fn load(path: &Path) -> Result<Self, BlamescopeError> {
        load_json(path)
    }

    /// Write the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), BlamescopeError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Static-analysis output: `{ "results": [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingsReport {
    /// Findings; a missing key reads as none.
    #[serde(default)]
    pub results: Vec<Finding>,
}

impl FindingsReport {
    /// Read a findings file.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::FileNotFound`] or
    /// [`BlamescopeError::MalformedInput`].
    pub fn load(path: &Path) -> Result<Self, BlamescopeError> {
        load_json(path)
    }
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, BlamescopeError> {
    if !path.exists() {
        return Err(BlamescopeError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| BlamescopeError::MalformedInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
