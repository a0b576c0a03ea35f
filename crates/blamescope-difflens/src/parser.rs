//! Unified diff to changed-line set.

use blamescope_core::{normalize_path, ChangeSet};

/// Position inside the current hunk.
///
/// `old_remaining`/`new_remaining` come from the hunk header and tell a
/// content line starting with `+++` apart from the next file's header.
#[derive(Debug, Clone, Copy)]
struct HunkCursor {
    next_line: u32,
    old_remaining: u32,
    new_remaining: u32,
}

impl HunkCursor {
    fn exhausted(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }
}

/// Fold state threaded through one pass over the diff.
#[derive(Default)]
struct ParseState {
    current_file: Option<String>,
    cursor: Option<HunkCursor>,
    changes: ChangeSet,
}

impl ParseState {
    fn start_file(&mut self, path: Option<String>) {
        self.current_file = path;
        self.cursor = None;
    }

    /// Move to the next new-side line. A hunk that runs past `u32::MAX` is
    /// treated like a malformed header: recording stops until the next one.
    fn advance(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            match cursor.next_line.checked_add(1) {
                Some(next) => cursor.next_line = next,
                None => self.cursor = None,
            }
        }
    }

    /// Consume one line that belongs to an open hunk.
    fn hunk_line(&mut self, line: &str) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        match line.as_bytes().first() {
            Some(b'+') => {
                if let Some(file) = &self.current_file {
                    self.changes.insert_lines(file, [cursor.next_line]);
                }
                cursor.new_remaining = cursor.new_remaining.saturating_sub(1);
                self.advance();
            }
            Some(b'-') => {
                cursor.old_remaining = cursor.old_remaining.saturating_sub(1);
            }
            Some(b'\\') => {}
            // Context; tools that strip trailing whitespace turn " " into "".
            Some(b' ') | None => {
                cursor.old_remaining = cursor.old_remaining.saturating_sub(1);
                cursor.new_remaining = cursor.new_remaining.saturating_sub(1);
                self.advance();
            }
            Some(_) => {
                self.cursor = None;
            }
        }
    }
}

/// Parse a unified diff into the set of lines it adds in the new revision.
///
/// Only `+` lines are recorded, numbered from the `+c` start of their hunk
/// and advanced by context and added lines; removed lines never advance the
/// counter. Files whose sections record no line (renames, mode changes,
/// binary files, pure deletions) have no entry in the result. Sections that
/// repeat a path, as in per-parent merge diffs, are unioned.
///
/// The parser is total: lines it does not understand are skipped, and a
/// malformed hunk header suspends recording until the next valid header.
///
/// # Examples
///
/// ```
/// use blamescope_difflens::parser::parse_changed_lines;
///
/// let diff = "diff --git a/foo.txt b/foo.txt\n\
///             --- a/foo.txt\n\
///             +++ b/foo.txt\n\
///             @@ -1,2 +1,3 @@\n\
///              one\n\
///             +two\n\
///              three\n";
/// let changes = parse_changed_lines(diff);
/// assert_eq!(changes.lines("foo.txt"), Some(&[2][..]));
/// ```
pub fn parse_changed_lines(input: &str) -> ChangeSet {
    let mut state = ParseState::default();

    for line in input.lines() {
        if state.cursor.is_some_and(|c| !c.exhausted()) && is_hunk_body(line) {
            state.hunk_line(line);
            continue;
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            let path = parse_git_header(rest);
            state.start_file(path);
            continue;
        }

        if line.starts_with("diff ") {
            // Combined (`diff --cc`) sections have no single new-side numbering.
            state.start_file(None);
            continue;
        }

        if let Some(raw) = line.strip_prefix("+++ ") {
            let path = parse_path(raw);
            state.start_file(path);
            continue;
        }

        if line.starts_with("--- ") {
            state.cursor = None;
            continue;
        }

        if line.starts_with("@@ ") {
            state.cursor = match (&state.current_file, parse_hunk_header(line)) {
                (Some(_), Some(header)) => Some(HunkCursor {
                    next_line: header.new_start,
                    old_remaining: header.old_lines,
                    new_remaining: header.new_lines,
                }),
                _ => None,
            };
            continue;
        }

        // Outside a hunk with budget: trailing lines of an over-long hunk are
        // still counted the way a plain line scanner would.
        if state.cursor.is_some() {
            state.hunk_line(line);
        }
    }

    state.changes
}

fn is_hunk_body(line: &str) -> bool {
    matches!(line.as_bytes().first(), None | Some(b'+' | b'-' | b' ' | b'\\'))
}

/// Old/new ranges from a `@@ -a,b +c,d @@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
}

/// Parse a hunk header line. Returns `None` when it is malformed.
///
/// # Examples
///
/// ```
/// use blamescope_difflens::parser::parse_hunk_header;
///
/// let h = parse_hunk_header("@@ -10,3 +11,4 @@ fn main() {").unwrap();
/// assert_eq!((h.new_start, h.new_lines), (11, 4));
/// assert!(parse_hunk_header("@@ garbage @@").is_none());
/// ```
pub fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let inner = line.strip_prefix("@@ ")?;
    let inner = &inner[..inner.find(" @@")?];

    let (old, new) = inner.split_once(' ')?;
    let (old_start, old_lines) = parse_range(old.strip_prefix('-')?)?;
    let (new_start, new_lines) = parse_range(new.strip_prefix('+')?)?;

    Some(HunkHeader {
        old_start,
        old_lines,
        new_start,
        new_lines,
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// New-side path from the remainder of a `diff --git` line.
fn parse_git_header(rest: &str) -> Option<String> {
    if rest.starts_with('"') || rest.ends_with('"') {
        let (_, new) = split_quoted_pair(rest)?;
        return parse_path(&new);
    }

    // `a/P b/P`: both halves equal unless renamed, so try the midpoint first.
    if rest.len() % 2 == 1 {
        let mid = rest.len() / 2;
        if rest.is_char_boundary(mid) && rest.as_bytes()[mid] == b' ' {
            let (old, new) = (&rest[..mid], &rest[mid + 1..]);
            if old.strip_prefix("a/") == new.strip_prefix("b/") {
                return parse_path(new);
            }
        }
    }

    let idx = rest.rfind(" b/")?;
    parse_path(&rest[idx + 1..])
}

/// Split `"a/x" "b/y"`, `a/x "b/y"` or `"a/x" b/y` into its two tokens.
fn split_quoted_pair(rest: &str) -> Option<(String, String)> {
    let (first, remainder) = if rest.starts_with('"') {
        let end = closing_quote(rest)?;
        (rest[..=end].to_string(), rest[end + 1..].trim_start())
    } else {
        let idx = rest.find(" \"")?;
        (rest[..idx].to_string(), rest[idx + 1..].trim_start())
    };
    Some((first, remainder.to_string()))
}

fn closing_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Decode a header path: unquote, drop `a/`/`b/`, normalize.
/// `/dev/null` yields `None`.
fn parse_path(raw: &str) -> Option<String> {
    // `+++` lines may carry a tab-separated timestamp.
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    let decoded = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        unquote(&raw[1..raw.len() - 1])
    } else {
        raw.to_string()
    };

    if decoded == "/dev/null" {
        return None;
    }

    let stripped = decoded
        .strip_prefix("a/")
        .or_else(|| decoded.strip_prefix("b/"))
        .unwrap_or(&decoded);
    let path = normalize_path(stripped);
    (!path.is_empty()).then(|| path.to_string())
}

/// Decode git's C-style quoting (`core.quotePath`).
fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let next = bytes[i + 1];
        match next {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|b| (b'0'..=b'7').contains(b))
                    .count();
                let value = bytes[i + 1..i + 1 + digits]
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                out.push(value as u8);
                i += 1 + digits;
                continue;
            }
            other => out.push(other),
        }
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}
