//! Correlation of static-analysis findings with changed lines.
//!
//! Reads the CI reports other pipeline steps exchange (`ci_git_report.json`,
//! findings `{ "results": [...] }`), keeps the findings that land on lines a
//! commit changed, and attributes each to that commit.

pub mod correlate;
pub mod report;
