//! Unified diff parsing into changed-line sets.
//!
//! Turns `git diff`/`git show` output into a [`blamescope_core::ChangeSet`]:
//! for every file, the line numbers the diff adds in the new revision.

pub mod parser;
