//! Git-backed analysis: commit history indexing and line attribution.
//!
//! Enumerates commits with git2, fetches each commit's patch through the
//! `git` CLI under a timeout, and folds the patches into a per-commit
//! [`index::ChangeIndex`]. Also resolves who last touched a line range,
//! optionally locating that range from a pasted snippet.

pub mod attribution;
pub mod git;
pub mod index;
pub mod mining;
pub mod snippet;
