//! Keep only the findings that land on changed lines.
//!
//! A finding is relevant when its file and start line are in a change set.
//! Relevant findings are copied through verbatim with a `commit_details`
//! object attached; everything else is dropped.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use blamescope_core::{normalize_path, BlamescopeError, ChangeSet};
use blamescope_gitpulse::index::ChangeIndex;
use blamescope_gitpulse::mining::CommitInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::report::GitReport;

/// One static-analysis finding, kept as the tool emitted it.
///
/// # Examples
///
/// ```
/// use blamescope_correlate::correlate::Finding;
///
/// let finding: Finding = serde_json::from_str(
///     r#"{"path": "./src/app.py", "start": {"line": 12, "col": 4}, "check_id": "eval"}"#,
/// ).unwrap();
/// assert_eq!(finding.path(), Some("./src/app.py"));
/// assert_eq!(finding.start_line(), Some(12));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Finding(pub Map<String, Value>);

impl Finding {
    /// The file the finding is in, as reported by the tool.
    pub fn path(&self) -> Option<&str> {
        self.0.get("path").and_then(Value::as_str).filter(|p| !p.is_empty())
    }

    /// Start line from `start.line`, or from `start` when it is a bare number.
    /// Whole-number floats such as `5.0` count as integers.
    pub fn start_line(&self) -> Option<u32> {
        let start = self.0.get("start")?;
        let line = match start {
            Value::Object(pos) => pos.get("line")?,
            other => other,
        };
        line_number(line)
    }

    /// The finding as a JSON object with `commit_details` attached.
    fn with_details(&self, details: &CommitDetails) -> Value {
        let mut object = self.0.clone();
        let details = serde_json::to_value(details).unwrap_or(Value::Null);
        object.insert("commit_details".into(), details);
        Value::Object(object)
    }
}

fn line_number(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok().filter(|&l| l > 0);
    }
    let f = value.as_f64()?;
    (f.fract() == 0.0 && f >= 1.0 && f <= f64::from(u32::MAX)).then_some(f as u32)
}

/// The commit a relevant finding is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetails {
    /// Full commit hash.
    pub commit_hash: Option<String>,
    /// Author name.
    pub commit_author: Option<String>,
    /// Author email.
    pub commit_email: Option<String>,
    /// Commit subject.
    pub commit_message: Option<String>,
    /// Pull request author, when known.
    pub pr_creator: Option<String>,
    /// Pull request number, when known.
    pub pr_number: Option<u64>,
}

impl From<&GitReport> for CommitDetails {
    fn from(report: &GitReport) -> Self {
        Self {
            commit_hash: report.git_info.commit_hash.clone(),
            commit_author: report.git_info.commit_author_name.clone(),
            commit_email: report.git_info.commit_author_email.clone(),
            commit_message: report.git_info.commit_message.clone(),
            pr_creator: report.ci_context.pr_creator.clone(),
            pr_number: report.ci_context.pr_number,
        }
    }
}

impl From<&CommitInfo> for CommitDetails {
    fn from(commit: &CommitInfo) -> Self {
        Self {
            commit_hash: Some(commit.hash.clone()),
            commit_author: Some(commit.author_name.clone()),
            commit_email: Some(commit.author_email.clone()),
            commit_message: Some(commit.message.clone()),
            pr_creator: None,
            pr_number: None,
        }
    }
}

/// Hash-based view of a [`ChangeSet`] for repeated membership tests.
pub struct ChangedLineLookup<'a> {
    files: HashMap<&'a str, HashSet<u32>>,
}

impl<'a> ChangedLineLookup<'a> {
    /// Materialize the lookup; borrows the paths from `changes`.
    pub fn new(changes: &'a ChangeSet) -> Self {
        let files: HashMap<&'a str, HashSet<u32>> = changes
            .iter()
            .map(|(path, lines)| (path, lines.iter().copied().collect::<HashSet<u32>>()))
            .collect();
        Self { files }
    }

    /// Whether `line` of `path` changed. `path` is normalized first.
    pub fn contains(&self, path: &str, line: u32) -> bool {
        self.files
            .get(normalize_path(path))
            .is_some_and(|lines| lines.contains(&line))
    }
}

/// Totals for a correlation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    /// Findings read.
    pub total_findings: usize,
    /// Findings on a changed line.
    pub relevant_findings: usize,
    /// Findings without a usable path or start line.
    pub skipped_findings: usize,
    /// The single commit findings were matched against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_details: Option<CommitDetails>,
    /// Distinct commits that received at least one finding (history mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commits_matched: Option<usize>,
}

/// Relevant findings plus a summary; written as `vulnerability_report.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    /// Totals.
    pub summary: CorrelationSummary,
    /// Relevant findings, each with `commit_details` attached.
    pub findings: Vec<Value>,
}

impl CorrelationReport {
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

/// Keep the findings whose start line `changes` contains.
///
/// Findings keep their input order. The output is a subset of the input,
/// and running the same inputs twice yields the same report.
///
/// # Examples
///
/// ```
/// use blamescope_core::ChangeSet;
/// use blamescope_correlate::correlate::{correlate, CommitDetails, Finding};
///
/// let mut changes = ChangeSet::new();
/// changes.insert_lines("app.py", [12]);
///
/// let findings: Vec<Finding> = serde_json::from_str(
///     r#"[{"path": "./app.py", "start": {"line": 12}}, {"path": "app.py", "start": {"line": 40}}]"#,
/// ).unwrap();
/// let report = correlate(&findings, &changes, &CommitDetails::default());
/// assert_eq!(report.summary.total_findings, 2);
/// assert_eq!(report.summary.relevant_findings, 1);
/// assert!(report.findings[0].get("commit_details").is_some());
/// ```
pub fn correlate(
    findings: &[Finding],
    changes: &ChangeSet,
    details: &CommitDetails,
) -> CorrelationReport {
    let lookup = ChangedLineLookup::new(changes);
    let mut skipped = 0;
    let mut relevant = Vec::new();

    for finding in findings {
        let (Some(path), Some(line)) = (finding.path(), finding.start_line()) else {
            skipped += 1;
            continue;
        };
        if lookup.contains(path, line) {
            relevant.push(finding.with_details(details));
        }
    }

    log::info!(
        "{} of {} findings are on changed lines ({} skipped)",
        relevant.len(),
        findings.len(),
        skipped
    );

    CorrelationReport {
        summary: CorrelationSummary {
            total_findings: findings.len(),
            relevant_findings: relevant.len(),
            skipped_findings: skipped,
            commit_details: Some(details.clone()),
            commits_matched: None,
        },
        findings: relevant,
    }
}

/// Attribute each finding to the first commit in `index` that changed its line.
///
/// Index order decides: for a newest-first index that is the most recent
/// commit to touch the line.
pub fn correlate_with_index(findings: &[Finding], index: &ChangeIndex) -> CorrelationReport {
    let lookups: Vec<(ChangedLineLookup<'_>, &CommitInfo)> = index
        .commits
        .iter()
        .filter(|record| !record.changed_lines.is_empty())
        .map(|record| (ChangedLineLookup::new(&record.changed_lines), &record.commit))
        .collect();

    let mut skipped = 0;
    let mut relevant = Vec::new();
    let mut matched: HashSet<&str> = HashSet::new();

    for finding in findings {
        let (Some(path), Some(line)) = (finding.path(), finding.start_line()) else {
            skipped += 1;
            continue;
        };
        let hit = lookups
            .iter()
            .find(|(lookup, _)| lookup.contains(path, line));
        if let Some((_, commit)) = hit {
            matched.insert(commit.hash.as_str());
            relevant.push(finding.with_details(&CommitDetails::from(*commit)));
        }
    }

    log::info!(
        "{} of {} findings attributed to {} commits ({} skipped)",
        relevant.len(),
        findings.len(),
        matched.len(),
        skipped
    );

    CorrelationReport {
        summary: CorrelationSummary {
            total_findings: findings.len(),
            relevant_findings: relevant.len(),
            skipped_findings: skipped,
            commit_details: None,
            commits_matched: Some(matched.len()),
        },
        findings: relevant,
    }
}

#[cfg(test)]
mod tests {
    use blamescope_core::HistoryOrder;
    use blamescope_gitpulse::index::CommitRecord;
    use serde_json::json;

    use super::*;

    fn finding(value: Value) -> Finding {
        serde_json::from_value(value).unwrap()
    }

    fn commit(hash: &str, author: &str) -> CommitInfo {
        CommitInfo {
            hash: hash.into(),
            author_name: author.into(),
            author_email: format!("{author}@example.com"),
            date: String::new(),
            message: format!("work by {author}"),
        }
    }

    fn record(hash: &str, author: &str, path: &str, lines: &[u32]) -> CommitRecord {
        let mut changed_lines = ChangeSet::new();
        changed_lines.insert_lines(path, lines.iter().copied());
        CommitRecord {
            commit: commit(hash, author),
            changed_lines,
            fetch_failed: false,
        }
    }

    #[test]
    fn start_line_nested_and_flat() {
        assert_eq!(finding(json!({"start": {"line": 7}})).start_line(), Some(7));
        assert_eq!(finding(json!({"start": 9})).start_line(), Some(9));
        assert_eq!(finding(json!({"start": {"col": 1}})).start_line(), None);
        assert_eq!(finding(json!({"start": "12"})).start_line(), None);
        assert_eq!(finding(json!({"start": 0})).start_line(), None);
        assert_eq!(finding(json!({})).start_line(), None);
    }

    #[test]
    fn start_line_accepts_whole_floats() {
        assert_eq!(finding(json!({"start": {"line": 5.0}})).start_line(), Some(5));
        assert_eq!(finding(json!({"start": 5.0})).start_line(), Some(5));
        assert_eq!(finding(json!({"start": {"line": 5.5}})).start_line(), None);
        assert_eq!(finding(json!({"start": {"line": 0.0}})).start_line(), None);
        assert_eq!(finding(json!({"start": {"line": -3.0}})).start_line(), None);
        assert_eq!(finding(json!({"start": {"line": 1e12}})).start_line(), None);

        let mut changes = ChangeSet::new();
        changes.insert_lines("a.py", [5]);
        let findings = vec![finding(json!({"path": "a.py", "start": {"line": 5.0}}))];
        let report = correlate(&findings, &changes, &CommitDetails::default());
        assert_eq!(report.summary.relevant_findings, 1);
        assert_eq!(report.summary.skipped_findings, 0);
    }

    #[test]
    fn path_must_be_non_empty_string() {
        assert_eq!(finding(json!({"path": "a.py"})).path(), Some("a.py"));
        assert_eq!(finding(json!({"path": ""})).path(), None);
        assert_eq!(finding(json!({"path": 3})).path(), None);
    }

    #[test]
    fn keeps_only_findings_on_changed_lines() {
        let mut changes = ChangeSet::new();
        changes.insert_lines("src/app.py", [10, 11]);
        let findings = vec![
            finding(json!({"path": "./src/app.py", "start": {"line": 10}, "check_id": "a"})),
            finding(json!({"path": "/src/app.py", "start": {"line": 12}, "check_id": "b"})),
            finding(json!({"path": "src/other.py", "start": {"line": 10}, "check_id": "c"})),
            finding(json!({"path": "src/app.py", "start": 11, "check_id": "d"})),
        ];
        let details = CommitDetails {
            commit_hash: Some("abc".into()),
            pr_number: Some(7),
            ..CommitDetails::default()
        };

        let report = correlate(&findings, &changes, &details);
        assert_eq!(report.summary.total_findings, 4);
        assert_eq!(report.summary.relevant_findings, 2);
        assert_eq!(report.summary.skipped_findings, 0);
        assert_eq!(report.summary.commit_details.as_ref(), Some(&details));

        assert_eq!(report.findings[0]["check_id"], "a");
        assert_eq!(report.findings[1]["check_id"], "d");
        assert_eq!(report.findings[0]["commit_details"]["commit_hash"], "abc");
        assert_eq!(report.findings[0]["commit_details"]["pr_number"], 7);
        // original fields pass through untouched
        assert_eq!(report.findings[0]["path"], "./src/app.py");
    }

    #[test]
    fn findings_without_location_are_skipped() {
        let mut changes = ChangeSet::new();
        changes.insert_lines("a.py", [1]);
        let findings = vec![
            finding(json!({"start": {"line": 1}})),
            finding(json!({"path": "a.py"})),
            finding(json!({"path": "a.py", "start": {"line": 1}})),
        ];
        let report = correlate(&findings, &changes, &CommitDetails::default());
        assert_eq!(report.summary.skipped_findings, 2);
        assert_eq!(report.summary.relevant_findings, 1);
    }

    #[test]
    fn empty_change_set_keeps_nothing() {
        let findings = vec![finding(json!({"path": "a.py", "start": {"line": 1}}))];
        let report = correlate(&findings, &ChangeSet::new(), &CommitDetails::default());
        assert!(report.findings.is_empty());
        assert_eq!(report.summary.total_findings, 1);
    }

    #[test]
    fn correlation_is_deterministic() {
        let mut changes = ChangeSet::new();
        changes.insert_lines("a.py", [1, 2, 3]);
        let findings: Vec<_> = (1..6)
            .map(|l| finding(json!({"path": "a.py", "start": {"line": l}})))
            .collect();
        let first = correlate(&findings, &changes, &CommitDetails::default());
        let second = correlate(&findings, &changes, &CommitDetails::default());
        assert_eq!(first, second);
    }

    #[test]
    fn index_attributes_to_first_matching_commit() {
        let index = ChangeIndex {
            order: HistoryOrder::NewestFirst,
            failed_commits: 0,
            commits: vec![
                record("c3", "carol", "app.py", &[5]),
                record("c2", "bob", "app.py", &[5, 6]),
                record("c1", "alice", "lib.py", &[1]),
            ],
        };
        let findings = vec![
            finding(json!({"path": "app.py", "start": {"line": 5}})),
            finding(json!({"path": "app.py", "start": {"line": 6}})),
            finding(json!({"path": "./lib.py", "start": {"line": 1}})),
            finding(json!({"path": "lib.py", "start": {"line": 2}})),
            finding(json!({"check_id": "no-location"})),
        ];

        let report = correlate_with_index(&findings, &index);
        assert_eq!(report.summary.total_findings, 5);
        assert_eq!(report.summary.relevant_findings, 3);
        assert_eq!(report.summary.skipped_findings, 1);
        assert_eq!(report.summary.commits_matched, Some(3));
        assert!(report.summary.commit_details.is_none());

        assert_eq!(report.findings[0]["commit_details"]["commit_author"], "carol");
        assert_eq!(report.findings[1]["commit_details"]["commit_author"], "bob");
        assert_eq!(report.findings[2]["commit_details"]["commit_hash"], "c1");
        assert!(report.findings[2]["commit_details"]["pr_creator"].is_null());
    }

    #[test]
    fn summary_omits_unused_keys() {
        let report = correlate(&[], &ChangeSet::new(), &CommitDetails::default());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["summary"].get("commits_matched").is_none());
        assert!(json["summary"]["commit_details"].is_object());

        let by_index = correlate_with_index(&[], &ChangeIndex::default());
        let json = serde_json::to_value(&by_index).unwrap();
        assert_eq!(json["summary"]["commits_matched"], 0);
        assert!(json["summary"].get("commit_details").is_none());
    }
}
