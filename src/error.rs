//! Common error types for yomikae

use std::fmt;
use thiserror::Error;

/// Common result type for yomikae operations
pub type Result<T> = std::result::Result<T, Error>;

/// External collaborators a correction run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    /// Morphological analyzer behind the tokenizer adapter
    Tokenizer,
    /// Language-model reading annotator
    Annotator,
    /// Speech-synthesis engine (query + render endpoints)
    Engine,
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamKind::Tokenizer => write!(f, "tokenizer"),
            UpstreamKind::Annotator => write!(f, "annotator"),
            UpstreamKind::Engine => write!(f, "synthesis engine"),
        }
    }
}

/// Error taxonomy for the correction engine.
///
/// `Upstream` and `Malformed` carry the collaborator that failed so a run
/// report can name the failing source. Alignment low-confidence and
/// out-of-range patches are deliberately *not* errors: the former is routed
/// to manual review, the latter is a skipped patch reported as a warning.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external collaborator could not be reached (retries exhausted)
    #[error("{upstream} unavailable: {message}")]
    Upstream {
        upstream: UpstreamKind,
        message: String,
    },

    /// An external collaborator answered with an unparseable structure
    #[error("malformed {upstream} response: {message}")]
    Malformed {
        upstream: UpstreamKind,
        message: String,
    },

    /// Invalid caller input (empty block, inconsistent token indices, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a bounded-backoff retry is worth attempting.
    ///
    /// Only unreachable upstreams (including timeouts) are retryable; a
    /// malformed response will not improve on a second request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream { .. })
    }
}
