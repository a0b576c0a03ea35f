//! Line attribution: who last touched a range of lines.
//!
//! Runs `git blame --line-porcelain` over a range, aggregates the per-line
//! records by author, and optionally fetches the range's evolution through
//! `git log -L` so a reviewer can see who introduced the logic rather than
//! who last reformatted it.

use blamescope_core::LineRange;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::git::GitCli;

/// One blamed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionRecord {
    /// Line number in the current file.
    pub line: u32,
    /// Commit that last changed the line.
    pub commit_hash: String,
    /// Author name.
    pub author: String,
    /// Author email, without angle brackets.
    pub email: String,
    /// Author time as unix seconds, verbatim from git.
    pub timestamp: String,
    /// Subject of the commit.
    pub summary: String,
    /// The line's text.
    pub content: String,
}

impl AttributionRecord {
    /// Author date as `YYYY-MM-DD`, if the timestamp parses.
    pub fn date(&self) -> Option<String> {
        let secs: i64 = self.timestamp.parse().ok()?;
        DateTime::from_timestamp(secs, 0).map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// Abbreviated commit hash.
    pub fn short_hash(&self) -> &str {
        self.commit_hash.get(..7).unwrap_or(&self.commit_hash)
    }
}

/// How sure the attribution is about its primary author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Every line in the range has the same author.
    High,
    /// Several authors share the range.
    Medium,
}

/// An author and how many lines of the range they own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Lines attributed to this author.
    pub lines_count: usize,
}

/// Aggregated authorship of a range.
///
/// # Examples
///
/// ```
/// use blamescope_gitpulse::attribution::{summarize, AttributionRecord, Confidence};
///
/// let line = |n: u32, who: &str| AttributionRecord {
///     line: n,
///     commit_hash: "a".repeat(40),
///     author: who.into(),
///     email: format!("{who}@example.com"),
///     timestamp: "1700000000".into(),
///     summary: "init".into(),
///     content: String::new(),
/// };
/// let summary = summarize(&[line(1, "alice"), line(2, "alice"), line(3, "bob")]).unwrap();
/// assert_eq!(summary.primary.name, "alice");
/// assert_eq!(summary.confidence, Confidence::Medium);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionSummary {
    /// Contributor with the most lines; first seen wins ties.
    pub primary: Contributor,
    /// `High` when there is exactly one contributor.
    pub confidence: Confidence,
    /// All contributors, most lines first.
    pub contributors: Vec<Contributor>,
    /// Lines blamed.
    pub total_lines: usize,
}

/// Blame result for one file range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// File as given by the caller.
    pub file: String,
    /// Range that was blamed.
    pub range: LineRange,
    /// Per-line records in file order.
    pub records: Vec<AttributionRecord>,
    /// Aggregate over `records`.
    pub summary: AttributionSummary,
}

/// The primary author entry of an [`AuthorshipReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestAuthor {
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Attribution confidence.
    pub confidence: Confidence,
}

/// JSON shape of `blamescope blame --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorshipReport {
    /// File as given by the caller.
    pub file: String,
    /// Blamed range as `start-end`.
    pub lines: String,
    /// Primary contributor.
    pub latest_author: LatestAuthor,
    /// Every contributor, most lines first.
    pub all_contributors: Vec<Contributor>,
    /// `git log -L` output, when a trace was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_output: Option<String>,
}

impl Attribution {
    /// Build the serializable report, attaching `trace` if one was fetched.
    pub fn to_report(&self, trace: Option<String>) -> AuthorshipReport {
        AuthorshipReport {
            file: self.file.clone(),
            lines: self.range.to_string(),
            latest_author: LatestAuthor {
                name: self.summary.primary.name.clone(),
                email: self.summary.primary.email.clone(),
                confidence: self.summary.confidence,
            },
            all_contributors: self.summary.contributors.clone(),
            trace_output: trace,
        }
    }
}

#[derive(Default)]
struct PendingRecord {
    line: u32,
    commit_hash: String,
    author: String,
    email: String,
    timestamp: String,
    summary: String,
}

/// Parse `git blame --line-porcelain` output into one record per line.
///
/// Each block starts with `<hash> <orig-line> <final-line>[ <count>]` and
/// ends with the tab-prefixed line content. Unknown headers are ignored.
pub fn parse_line_porcelain(output: &str) -> Vec<AttributionRecord> {
    let mut records = Vec::new();
    let mut pending: Option<PendingRecord> = None;

    for line in output.lines() {
        if let Some(content) = line.strip_prefix('\t') {
            if let Some(p) = pending.take() {
                records.push(AttributionRecord {
                    line: p.line,
                    commit_hash: p.commit_hash,
                    author: p.author,
                    email: p.email,
                    timestamp: p.timestamp,
                    summary: p.summary,
                    content: content.to_string(),
                });
            }
            continue;
        }

        if let Some((hash, final_line)) = parse_block_header(line) {
            pending = Some(PendingRecord {
                line: final_line,
                commit_hash: hash.to_string(),
                ..PendingRecord::default()
            });
            continue;
        }

        let Some(p) = pending.as_mut() else {
            continue;
        };
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        match key {
            "author" => p.author = value.to_string(),
            "author-mail" => {
                p.email = value
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            }
            "author-time" => p.timestamp = value.to_string(),
            "summary" => p.summary = value.to_string(),
            _ => {}
        }
    }

    records
}

fn parse_block_header(line: &str) -> Option<(&str, u32)> {
    let mut parts = line.split(' ');
    let hash = parts.next()?;
    if !matches!(hash.len(), 40 | 64) || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let _orig_line: u32 = parts.next()?.parse().ok()?;
    let final_line: u32 = parts.next()?.parse().ok()?;
    Some((hash, final_line))
}

/// Aggregate records by `(author, email)`.
///
/// Contributors are ordered by line count, descending; equal counts keep the
/// order in which the author first appears in the range. Returns `None` when
/// there are no records.
pub fn summarize(records: &[AttributionRecord]) -> Option<AttributionSummary> {
    let mut contributors: Vec<Contributor> = Vec::new();
    for record in records {
        match contributors
            .iter_mut()
            .find(|c| c.name == record.author && c.email == record.email)
        {
            Some(c) => c.lines_count += 1,
            None => contributors.push(Contributor {
                name: record.author.clone(),
                email: record.email.clone(),
                lines_count: 1,
            }),
        }
    }
    // stable: ties stay in first-seen order
    contributors.sort_by(|a, b| b.lines_count.cmp(&a.lines_count));

    let primary = contributors.first()?.clone();
    let confidence = if contributors.len() == 1 {
        Confidence::High
    } else {
        Confidence::Medium
    };
    Some(AttributionSummary {
        primary,
        confidence,
        contributors,
        total_lines: records.len(),
    })
}

/// Answers "who wrote these lines" for files in one repository.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use blamescope_core::LineRange;
/// use blamescope_gitpulse::attribution::LineAttributionResolver;
/// use blamescope_gitpulse::git::GitCli;
///
/// # async fn demo() {
/// let resolver = LineAttributionResolver::new(GitCli::new(".", Duration::from_secs(30)));
/// let range = LineRange::new(10, 20).unwrap();
/// if let Some(attribution) = resolver.attribute("src/lib.rs", range, true).await {
///     println!("{}", attribution.summary.primary.name);
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LineAttributionResolver {
    git: GitCli,
}

impl LineAttributionResolver {
    /// Create a resolver running git through `git`.
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// Blame `range` of `path`.
    ///
    /// With `ignore_whitespace`, whitespace-only edits are attributed to the
    /// commit before them. Returns `None` when git fails or yields no lines.
    pub async fn attribute(
        &self,
        path: &str,
        range: LineRange,
        ignore_whitespace: bool,
    ) -> Option<Attribution> {
        let span = format!("{},{}", range.start, range.end);
        let mut args = vec!["blame", "--line-porcelain", "-L", span.as_str()];
        if ignore_whitespace {
            args.push("-w");
        }
        args.extend(["--", path]);

        let output = self.git.run(&args).await?;
        let records = parse_line_porcelain(&output);
        let summary = summarize(&records)?;
        Some(Attribution {
            file: path.to_string(),
            range,
            records,
            summary,
        })
    }

    /// History of `range` in `path` as printed by `git log -L`.
    ///
    /// Returns `None` if the range cannot be traced or git fails.
    pub async fn trace(&self, path: &str, range: LineRange) -> Option<String> {
        let range_arg = format!("-L{},{}:{}", range.start, range.end, path);
        let output = match self.git.output(&["log", "--no-color", range_arg.as_str()]).await {
            Ok(output) => output,
            Err(e) => {
                log::warn!("{e}");
                return None;
            }
        };
        if output.stderr.contains("no match") {
            log::warn!("lines {range} of {path} cannot be traced as a block through history");
            return None;
        }
        if !output.success {
            log::warn!("`git log {range_arg}` failed: {}", output.stderr.trim());
            return None;
        }
        let trace = output.stdout.trim_end();
        (!trace.is_empty()).then(|| trace.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::git::tests::git_available;
    use crate::mining::tests::make_repo;

    const HASH_A: &str = "1111111111111111111111111111111111111111";
    const HASH_B: &str = "2222222222222222222222222222222222222222";

    fn block(hash: &str, line: u32, author: &str, content: &str) -> String {
        format!(
            "{hash} {line} {line} 1\n\
             author {author}\n\
             author-mail <{author}@example.com>\n\
             author-time 1700000000\n\
             author-tz +0000\n\
             committer {author}\n\
             committer-mail <{author}@example.com>\n\
             committer-time 1700000000\n\
             committer-tz +0000\n\
             summary change by {author}\n\
             filename src/app.py\n\
             \t{content}\n"
        )
    }

    fn record(line: u32, author: &str) -> AttributionRecord {
        AttributionRecord {
            line,
            commit_hash: HASH_A.into(),
            author: author.into(),
            email: format!("{author}@example.com"),
            timestamp: "1700000000".into(),
            summary: "s".into(),
            content: String::new(),
        }
    }

    #[test]
    fn parses_line_porcelain_blocks() {
        let output = format!(
            "{}{}",
            block(HASH_A, 10, "alice", "    x = 1"),
            block(HASH_B, 11, "bob", "\treturn x")
        );
        let records = parse_line_porcelain(&output);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].line, 10);
        assert_eq!(records[0].commit_hash, HASH_A);
        assert_eq!(records[0].author, "alice");
        assert_eq!(records[0].email, "alice@example.com");
        assert_eq!(records[0].timestamp, "1700000000");
        assert_eq!(records[0].summary, "change by alice");
        assert_eq!(records[0].content, "    x = 1");

        assert_eq!(records[1].author, "bob");
        assert_eq!(records[1].content, "\treturn x");
        assert_eq!(records[1].short_hash(), "2222222");
    }

    #[test]
    fn hex_looking_content_is_not_a_header() {
        let output = block(HASH_A, 1, "alice", HASH_B);
        let records = parse_line_porcelain(&output);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, HASH_B);
    }

    #[test]
    fn empty_output_has_no_records() {
        assert!(parse_line_porcelain("").is_empty());
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn split_authorship_is_medium_confidence() {
        let records = vec![
            record(1, "alice"),
            record(2, "bob"),
            record(3, "alice"),
            record(4, "bob"),
            record(5, "alice"),
        ];
        let summary = summarize(&records).unwrap();
        assert_eq!(summary.primary.name, "alice");
        assert_eq!(summary.primary.lines_count, 3);
        assert_eq!(summary.confidence, Confidence::Medium);
        assert_eq!(summary.contributors[1].name, "bob");
        assert_eq!(summary.contributors[1].lines_count, 2);
        assert_eq!(summary.total_lines, 5);
    }

    #[test]
    fn single_author_is_high_confidence() {
        let summary = summarize(&[record(1, "carol"), record(2, "carol")]).unwrap();
        assert_eq!(summary.primary.name, "carol");
        assert_eq!(summary.confidence, Confidence::High);
        assert_eq!(summary.contributors.len(), 1);
    }

    #[test]
    fn ties_keep_first_seen_author() {
        let summary = summarize(&[record(1, "dave"), record(2, "erin")]).unwrap();
        assert_eq!(summary.primary.name, "dave");
        assert_eq!(summary.confidence, Confidence::Medium);
    }

    #[test]
    fn same_name_different_email_are_distinct() {
        let mut other = record(2, "alice");
        other.email = "alice@work.example.com".into();
        let summary = summarize(&[record(1, "alice"), other]).unwrap();
        assert_eq!(summary.contributors.len(), 2);
    }

    #[test]
    fn record_date_formats_timestamp() {
        assert_eq!(record(1, "a").date().as_deref(), Some("2023-11-14"));
        let mut bad = record(1, "a");
        bad.timestamp = "soon".into();
        assert!(bad.date().is_none());
    }

    #[test]
    fn report_json_shape() {
        let records = vec![record(3, "alice"), record(4, "bob")];
        let attribution = Attribution {
            file: "src/app.py".into(),
            range: LineRange::new(3, 4).unwrap(),
            summary: summarize(&records).unwrap(),
            records,
        };
        let json = serde_json::to_value(attribution.to_report(None)).unwrap();
        assert_eq!(json["file"], "src/app.py");
        assert_eq!(json["lines"], "3-4");
        assert_eq!(json["latest_author"]["name"], "alice");
        assert_eq!(json["latest_author"]["confidence"], "Medium");
        assert_eq!(json["all_contributors"][1]["lines_count"], 1);
        assert!(json.get("trace_output").is_none());

        let traced = serde_json::to_value(attribution.to_report(Some("commit abc".into()))).unwrap();
        assert_eq!(traced["trace_output"], "commit abc");
    }

    #[tokio::test]
    async fn attribute_and_trace_a_real_repository() {
        if !git_available() {
            return;
        }
        let dir = make_repo(&[
            ("alice", "a.txt", "one\ntwo\nthree\n"),
            ("bob", "a.txt", "one\ntwo\nthree\nfour\nfive\n"),
        ]);
        let resolver = LineAttributionResolver::new(GitCli::new(dir.path(), Duration::from_secs(30)));
        let range = LineRange::new(1, 5).unwrap();

        let attribution = resolver.attribute("a.txt", range, true).await.unwrap();
        assert_eq!(attribution.records.len(), 5);
        assert_eq!(attribution.summary.primary.name, "alice");
        assert_eq!(attribution.summary.primary.lines_count, 3);
        assert_eq!(attribution.summary.confidence, Confidence::Medium);
        assert_eq!(attribution.records[4].content, "five");
        assert_eq!(attribution.records[4].summary, "commit 1");

        let trace = resolver.trace("a.txt", range).await.unwrap();
        assert!(trace.contains("commit "));
    }

    #[tokio::test]
    async fn attribute_out_of_range_is_none() {
        if !git_available() {
            return;
        }
        let dir = make_repo(&[("alice", "a.txt", "one\n")]);
        let resolver = LineAttributionResolver::new(GitCli::new(dir.path(), Duration::from_secs(30)));
        let range = LineRange::new(50, 60).unwrap();
        assert!(resolver.attribute("a.txt", range, false).await.is_none());
        assert!(resolver.attribute("missing.txt", range, false).await.is_none());
    }
}
