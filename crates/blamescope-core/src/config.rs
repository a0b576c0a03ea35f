use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BlamescopeError;

/// Top-level configuration loaded from `.blamescope.toml`.
///
/// Supports layered resolution: CLI flags > config file > defaults.
///
/// # Examples
///
/// ```
/// use blamescope_core::BlamescopeConfig;
///
/// let config = BlamescopeConfig::default();
/// assert_eq!(config.history.workers, 8);
/// assert!(config.attribution.ignore_whitespace);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlamescopeConfig {
    /// History walking and change-index settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Blame and trace settings.
    #[serde(default)]
    pub attribution: AttributionConfig,
    /// Finding correlation settings.
    #[serde(default)]
    pub correlate: CorrelateConfig,
}

impl BlamescopeConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::Io`] if the file cannot be read,
    /// [`BlamescopeError::Toml`] if the content is not valid TOML, or
    /// [`BlamescopeError::Config`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, BlamescopeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::Toml`] if parsing fails, or
    /// [`BlamescopeError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use blamescope_core::BlamescopeConfig;
    ///
    /// let toml = r#"
    /// [history]
    /// workers = 2
    /// "#;
    /// let config = BlamescopeConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.history.workers, 2);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, BlamescopeError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BlamescopeError> {
        if self.history.workers == 0 {
            return Err(BlamescopeError::Config(
                "history.workers must be at least 1".into(),
            ));
        }
        if self.history.timeout_secs == 0 {
            return Err(BlamescopeError::Config(
                "history.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Order in which commits are enumerated and stored in the change index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryOrder {
    /// Most recent commit first, as `git log` prints them.
    #[default]
    NewestFirst,
    /// Root commit first.
    OldestFirst,
}

impl fmt::Display for HistoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryOrder::NewestFirst => write!(f, "newest-first"),
            HistoryOrder::OldestFirst => write!(f, "oldest-first"),
        }
    }
}

/// Which parents a merge commit is diffed against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeParents {
    /// Diff against the first parent only.
    #[default]
    First,
    /// Diff against every parent and union the changed lines.
    Union,
}

/// History walking configuration.
///
/// # Examples
///
/// ```
/// use blamescope_core::{HistoryConfig, HistoryOrder, MergeParents};
///
/// let config = HistoryConfig::default();
/// assert_eq!(config.timeout_secs, 30);
/// assert_eq!(config.order, HistoryOrder::NewestFirst);
/// assert_eq!(config.merge_parents, MergeParents::First);
/// assert!(config.max_commits.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum concurrent diff fetches (default: 8).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-invocation timeout for git commands in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Commit order of the index (default: newest first).
    #[serde(default)]
    pub order: HistoryOrder,
    /// Merge commit diff policy (default: first parent).
    #[serde(default)]
    pub merge_parents: MergeParents,
    /// Stop after this many commits.
    pub max_commits: Option<usize>,
    /// Branch to walk (default: HEAD).
    pub branch: Option<String>,
}

fn default_workers() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            order: HistoryOrder::default(),
            merge_parents: MergeParents::default(),
            max_commits: None,
            branch: None,
        }
    }
}

/// Blame and trace configuration.
///
/// # Examples
///
/// ```
/// use blamescope_core::AttributionConfig;
///
/// let config = AttributionConfig::default();
/// assert_eq!(config.preview_lines, 5);
/// assert_eq!(config.trace_preview_chars, 2000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Attribute whitespace-only edits to the prior substantive commit (default: true).
    #[serde(default = "default_true")]
    pub ignore_whitespace: bool,
    /// Blamed lines shown in text output (default: 5).
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
    /// Characters of trace shown in text output (default: 2000).
    #[serde(default = "default_trace_preview_chars")]
    pub trace_preview_chars: usize,
}

fn default_true() -> bool {
    true
}

fn default_preview_lines() -> usize {
    5
}

fn default_trace_preview_chars() -> usize {
    2000
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            ignore_whitespace: true,
            preview_lines: default_preview_lines(),
            trace_preview_chars: default_trace_preview_chars(),
        }
    }
}

/// Finding correlation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelateConfig {
    /// Where the correlation report is written (default: `vulnerability_report.json`).
    #[serde(default = "default_output")]
    pub output: String,
}

fn default_output() -> String {
    "vulnerability_report.json".into()
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}
