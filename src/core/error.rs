//! Error types shared by sequences, stages and parallel drivers.

use std::sync::Arc;

use thiserror::Error as ThisError;

/// The main error type for the toolkit.
///
/// Errors are `Clone` so a stage's completion can be observed by any number
/// of awaiters.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// A suspend point observed a fired cancellation token
    #[error("operation was cancelled")]
    Cancelled,

    /// A bounded stage had no room for a posted item
    #[error("stage `{stage}` is full ({capacity} items queued)")]
    QueueFull { stage: String, capacity: usize },

    /// The stage has completed or faulted and declines new input
    #[error("stage `{stage}` no longer accepts items")]
    Declined { stage: String },

    /// A second cancellation token was attached to one sequence iteration
    #[error("a cancellation token is already attached to this iteration")]
    CancellationAlreadyAttached,

    /// The source has no suspend point a token could be attached to
    #[error("source does not support cancellation")]
    CancellationUnsupported,

    /// A processor failed to transform an item
    #[error("processor error: {0}")]
    Processor(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A sink failed to consume an item
    #[error("sink error: {0}")]
    Sink(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A node id that does not belong to the tree
    #[error("node {0} does not exist")]
    UnknownNode(usize),

    /// A child edge that is already owned by another node
    #[error("node {parent} already has a {side} child")]
    EdgeOccupied { parent: usize, side: &'static str },

    /// A spawned task panicked or was aborted
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),

    /// Multiple errors occurred (e.g., in fan-out drivers)
    #[error("multiple errors occurred: {}", display_all(.0))]
    Multiple(Vec<Error>),
}

fn display_all(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}]", e))
        .collect::<Vec<_>>()
        .join(", ")
}

// Convenience constructors
impl Error {
    /// Create a processor error from any error type
    pub fn processor<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Processor(Arc::new(error))
    }

    /// Create a sink error from any error type
    pub fn sink<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Sink(Arc::new(error))
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error is, or contains, a cancellation failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_cancelled),
            _ => false,
        }
    }

    /// Fold a list of failures into one error.
    ///
    /// Returns `None` for an empty list and the error itself for a single one.
    pub fn collect(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_processor_error(self) -> Result<T>;
    fn into_sink_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_processor_error(self) -> Result<T> {
        self.map_err(Error::processor)
    }

    fn into_sink_error(self) -> Result<T> {
        self.map_err(Error::sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_errors() {
        assert!(Error::collect(vec![]).is_none());
        assert!(matches!(
            Error::collect(vec![Error::Cancelled]),
            Some(Error::Cancelled)
        ));
        let many = Error::collect(vec![Error::custom("a"), Error::Cancelled]).unwrap();
        assert!(many.is_cancelled());
        assert_eq!(
            many.to_string(),
            "multiple errors occurred: [a], [operation was cancelled]"
        );
    }

    #[test]
    fn test_into_error() {
        let parsed: std::result::Result<i32, std::num::ParseIntError> = "x".parse::<i32>();
        let err = parsed.into_processor_error().unwrap_err();
        assert!(matches!(err, Error::Processor(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
