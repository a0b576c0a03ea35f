use std::path::PathBuf;

/// Errors that can occur across blamescope.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary turns it into a `miette` report at the boundary.
///
/// Absence is not an error: a snippet that is not found or a line range with
/// no blame data is reported as `None` by the operation that looked for it.
///
/// # Examples
///
/// ```
/// use blamescope_core::BlamescopeError;
///
/// let err = BlamescopeError::Config("workers must be positive".into());
/// assert!(err.to_string().contains("workers must be positive"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum BlamescopeError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    #[diagnostic(help("run blamescope from inside a git repository, or pass --path"))]
    Git(String),

    /// An external command did not finish within the configured timeout.
    #[error("`{command}` timed out after {seconds}s")]
    #[diagnostic(help("raise history.timeout_secs in .blamescope.toml"))]
    Timeout {
        /// The command line that was running.
        command: String,
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// A persisted report could not be read as the expected structure.
    #[error("malformed input in {}: {reason}", .path.display())]
    MalformedInput {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A line range argument was not of the form `N` or `N-M` with `1 <= N <= M`.
    #[error("invalid line range: {0}")]
    #[diagnostic(help("use a single line such as 15 or a range such as 10-20"))]
    InvalidRange(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
