use std::{fmt, io};
use thiserror::Error;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration errors raised while building the middleware.
///
/// These are startup failures: a middleware that cannot be built never
/// serves a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The compression level is outside `0..=9`.
    #[error("gzip: invalid compression level '{0}'")]
    InvalidLevel(i32),

    /// A domain pattern is the empty string.
    #[error("gzip: empty domain at position {index}")]
    EmptyDomain {
        /// Position of the pattern in the configured list.
        index: usize,
    },
}

/// Failure to finish a gzip stream while releasing a pooled writer.
///
/// The sink the writer was bound to is handed back alongside the error.
#[derive(Error)]
#[error("gzip: failed to finish stream: {error}")]
pub struct ReleaseError<W> {
    #[source]
    error: io::Error,
    sink: W,
}

impl<W> ReleaseError<W> {
    pub(crate) fn new(error: io::Error, sink: W) -> Self {
        Self { error, sink }
    }

    /// Returns the I/O error that stopped the stream from finishing.
    pub fn error(&self) -> &io::Error {
        &self.error
    }

    /// Returns the sink, discarding the error.
    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Splits into the error and the sink.
    pub fn into_parts(self) -> (io::Error, W) {
        (self.error, self.sink)
    }
}

impl<W> fmt::Debug for ReleaseError<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<W> From<ReleaseError<W>> for io::Error {
    fn from(err: ReleaseError<W>) -> Self {
        err.error
    }
}
