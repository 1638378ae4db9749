//! Error types for host command execution.
//!
//! Errors are categorized so that retry middleware can tell transient
//! command failures apart from terminal conditions like a missing
//! executable or a definitive "no such snap" answer from the store.

use thiserror::Error;

/// Errors that can occur while executing commands and file operations
/// against the host.
#[derive(Debug, Error)]
pub enum Error {
    /// The command ran and exited non-zero. Carries the combined
    /// stdout/stderr so callers can branch on the tool's output.
    #[error("command failed: {command}")]
    CommandFailed {
        /// The rendered command line.
        command: String,
        /// Combined standard output/error of the failed command.
        output: String,
    },

    /// The executable could not be located on the host. Dry runs report
    /// this for read-only commands whose tool is absent, and treat it
    /// as "nothing to report" rather than a failure.
    #[error("command not installed: {0}")]
    NotInstalled(String),

    /// No shell could be located to run commands through.
    #[error("unable to determine shell path to run command")]
    NoShell,

    /// A definitive answer from the snap store: the snap does not exist.
    #[error("failed to find snap: {0}")]
    SnapNotFound(String),

    /// The snapd API could not be queried (socket, protocol or status
    /// problems); worth retrying.
    #[error("snapd query failed: {0}")]
    Snapd(#[source] snapd::Error),

    /// File read/write, directory or ownership operation failed.
    #[error("{message}: {source}")]
    Fs {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Effective user details could not be resolved.
    #[error("failed to lookup user details: {0}")]
    UserLookup(String),

    /// A path-shape precondition was violated (e.g. an absolute path
    /// passed where a home-relative one is required).
    #[error("{0}")]
    InvalidPath(String),

    /// The requested file does not exist on the host.
    #[error("file not found: {0}")]
    FileNotFound(String),
}

impl Error {
    /// Whether this error is typically transient and worth retrying.
    ///
    /// Command failures are retry-eligible because the retry middleware
    /// is only applied to operations against services that are
    /// transiently not-yet-ready; definitive answers and local
    /// environment problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommandFailed { .. } | Self::Snapd(_))
    }

    /// The combined output of a failed command, when there is one.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl From<snapd::Error> for Error {
    fn from(err: snapd::Error) -> Self {
        match err {
            snapd::Error::NotFound(name) => Self::SnapNotFound(name),
            other => Self::Snapd(other),
        }
    }
}

/// Result type for host execution operations.
pub type Result<T> = std::result::Result<T, Error>;
