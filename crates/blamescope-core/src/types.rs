use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BlamescopeError;

/// Strip a single leading `./` or `/` from a repository-relative path.
///
/// Static-analysis tools and git disagree on path prefixes; both sides of a
/// comparison go through this function.
///
/// # Examples
///
/// ```
/// use blamescope_core::normalize_path;
///
/// assert_eq!(normalize_path("./src/app.py"), "src/app.py");
/// assert_eq!(normalize_path("/src/app.py"), "src/app.py");
/// assert_eq!(normalize_path("src/app.py"), "src/app.py");
/// ```
pub fn normalize_path(path: &str) -> &str {
    path.strip_prefix("./")
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(path)
}

/// Changed line numbers per file, in the new revision's numbering.
///
/// Keys are normalized repository-relative paths. Every line list is
/// ascending, unique, and non-empty: a file without changed lines has no
/// entry, and callers treat a missing key as "no changes".
///
/// Serializes as a plain `{ "path": [lines...] }` object. Deserializing
/// re-establishes the invariants, so hand-edited reports are normalized.
///
/// # Examples
///
/// ```
/// use blamescope_core::ChangeSet;
///
/// let mut changes = ChangeSet::new();
/// changes.insert_lines("./foo.py", [7, 3, 3]);
/// assert_eq!(changes.lines("foo.py"), Some(&[3, 7][..]));
/// assert!(changes.contains("foo.py", 7));
/// assert!(!changes.contains("bar.py", 7));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet {
    files: BTreeMap<String, Vec<u32>>,
}

impl<'de> Deserialize<'de> for ChangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<u32>>::deserialize(deserializer)?;
        let mut changes = ChangeSet::new();
        for (path, lines) in raw {
            changes.insert_lines(&path, lines);
        }
        Ok(changes)
    }
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `lines` into the entry for `path`.
    ///
    /// Zero is not a valid line number and is dropped. Nothing is inserted
    /// when no valid line remains.
    pub fn insert_lines(&mut self, path: &str, lines: impl IntoIterator<Item = u32>) {
        let mut incoming: Vec<u32> = lines.into_iter().filter(|&l| l > 0).collect();
        if incoming.is_empty() {
            return;
        }
        let entry = self.files.entry(normalize_path(path).to_string()).or_default();
        entry.append(&mut incoming);
        entry.sort_unstable();
        entry.dedup();
    }

    /// Changed lines for `path`, if the file was touched.
    pub fn lines(&self, path: &str) -> Option<&[u32]> {
        self.files.get(normalize_path(path)).map(Vec::as_slice)
    }

    /// Whether `line` of `path` was changed.
    ///
    /// This is a binary search; bulk membership tests should materialize a
    /// hash set instead.
    pub fn contains(&self, path: &str, line: u32) -> bool {
        self.lines(path)
            .is_some_and(|lines| lines.binary_search(&line).is_ok())
    }

    /// Iterate `(path, lines)` in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u32])> {
        self.files.iter().map(|(p, l)| (p.as_str(), l.as_slice()))
    }

    /// Changed file paths in order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Number of files with at least one changed line.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Total changed lines across all files.
    pub fn line_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Whether no file has changed lines.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &ChangeSet) {
        for (path, lines) in other.iter() {
            self.insert_lines(path, lines.iter().copied());
        }
    }
}

/// An inclusive, 1-based line range.
///
/// Parses from `"15"` or `"10-20"`.
///
/// # Examples
///
/// ```
/// use blamescope_core::LineRange;
///
/// let range: LineRange = "10-20".parse().unwrap();
/// assert_eq!((range.start, range.end), (10, 20));
/// assert_eq!(range.len(), 11);
///
/// let single: LineRange = "15".parse().unwrap();
/// assert_eq!(single.to_string(), "15-15");
///
/// assert!("20-10".parse::<LineRange>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    /// First line (1-based).
    pub start: u32,
    /// Last line, inclusive.
    pub end: u32,
}

impl LineRange {
    /// Create a range, validating `1 <= start <= end`.
    ///
    /// # Errors
    ///
    /// Returns [`BlamescopeError::InvalidRange`] for zero or reversed bounds.
    pub fn new(start: u32, end: u32) -> Result<Self, BlamescopeError> {
        if start == 0 || end < start {
            return Err(BlamescopeError::InvalidRange(format!("{start}-{end}")));
        }
        Ok(Self { start, end })
    }

    /// Number of lines covered.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for LineRange {
    type Err = BlamescopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BlamescopeError::InvalidRange(s.to_string());
        let s = s.trim();
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (a.trim(), b.trim()),
            None => (s, s),
        };
        let start = start.parse().map_err(|_| invalid())?;
        let end = end.parse().map_err(|_| invalid())?;
        Self::new(start, end).map_err(|_| invalid())
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use blamescope_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
