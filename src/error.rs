//! Centralized error types for mailsearch.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailsearch library.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Malformed expression text.
    #[error("Parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// A builtin received the wrong number of arguments.
    #[error("Wrong number of arguments to '{function}': {reason}")]
    Arity { function: String, reason: String },

    /// A builtin received (or a sub-term produced) the wrong result variant.
    #[error("Type error in '{function}': {reason}")]
    Type { function: String, reason: String },

    /// The expression calls a function this execution path does not know.
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// A user-supplied regular expression failed to compile.
    #[error("Invalid regular expression '{pattern}': {reason}")]
    Regex { pattern: String, reason: String },

    /// The backing store failed for a reason other than a missing table.
    #[error("Store error: {0}")]
    Store(String),

    /// The backing store has no table for this folder yet.
    #[error("No such table: {0}")]
    MissingTable(String),

    /// The search was cancelled.
    #[error("Search cancelled")]
    Cancelled,

    /// A full message could not be fetched (e.g. offline or expunged).
    #[error("Message '{0}' is not available")]
    FetchUnavailable(String),

    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file does not appear to be a valid mbox.
    #[error("File does not appear to be a valid mbox: {0}")]
    InvalidMbox(PathBuf),

    /// The persisted folder index is corrupt or was built by another version.
    #[error("Corrupt or incompatible index for '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// A MIME decoding error.
    #[error("MIME decoding error: {0}")]
    Mime(String),
}

/// Convenience alias for `Result<T, SearchError>`.
pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `Arity` variant.
    pub fn arity(function: &str, reason: impl Into<String>) -> Self {
        Self::Arity {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a `Type` variant.
    pub fn type_error(function: &str, reason: impl Into<String>) -> Self {
        Self::Type {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that a search recovers from locally instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingTable(_) | Self::FetchUnavailable(_))
    }
}

impl From<std::io::Error> for SearchError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(e: rusqlite::Error) -> Self {
        let message = e.to_string();
        match message.split_once("no such table: ") {
            Some((_, rest)) => {
                let table = rest.split_whitespace().next().unwrap_or_default();
                Self::MissingTable(table.to_string())
            }
            None => Self::Store(message),
        }
    }
}
