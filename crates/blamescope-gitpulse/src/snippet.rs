//! Locate a pasted code snippet inside a file.
//!
//! Matching is indentation-tolerant: both sides are compared line by line
//! after trimming, and blank lines in the snippet are dropped first.

use std::path::Path;

use blamescope_core::{BlamescopeError, LineRange};

/// Find the first place `snippet` occurs in `content`.
///
/// Returns the 1-based inclusive line range of the match, or `None` if the
/// snippet has no non-blank lines or does not occur.
///
/// # Examples
///
/// ```
/// use blamescope_gitpulse::snippet::locate_snippet;
///
/// let file = "def foo():\n      pass\n\ndef bar():\n";
/// let range = locate_snippet(file, "def foo():\n    pass").unwrap();
/// assert_eq!((range.start, range.end), (1, 2));
/// ```
pub fn locate_snippet(content: &str, snippet: &str) -> Option<LineRange> {
    let needle: Vec<&str> = snippet
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if needle.is_empty() {
        return None;
    }

    let haystack: Vec<&str> = content.lines().map(str::trim).collect();
    let offset = haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice())?;

    let start = u32::try_from(offset + 1).ok()?;
    let end = u32::try_from(offset + needle.len()).ok()?;
    LineRange::new(start, end).ok()
}

/// Read `path` and locate `snippet` in it.
///
/// Invalid UTF-8 is replaced rather than rejected.
///
/// # Errors
///
/// Returns [`BlamescopeError::FileNotFound`] if `path` does not exist and
/// [`BlamescopeError::Io`] if it cannot be read.
pub fn locate_in_file(path: &Path, snippet: &str) -> Result<Option<LineRange>, BlamescopeError> {
    if !path.exists() {
        return Err(BlamescopeError::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(locate_snippet(&content, snippet))
}
