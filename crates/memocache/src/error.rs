use thiserror::Error;

/// The result of a cache operation, containing either the value or a [`CacheError`].
pub type CacheResult<T = ()> = Result<T, CacheError>;

/// An error that happens while coordinating a cached computation.
///
/// This type is `Clone` on purpose: results are broadcast to every caller that
/// joined an in-flight computation through a shared channel, so errors carry
/// message strings rather than error sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Connecting to the backing store failed after exhausting the retry budget.
    #[error("connection `{name}` failed after {attempts} attempt(s): {message}")]
    ConnectionFailed {
        name: String,
        attempts: u32,
        message: String,
    },
    /// A store operation failed after a connection was established.
    ///
    /// Carries the operation and key for diagnostics.
    #[error("{op} failed for key `{key}`: {message}")]
    Store {
        op: &'static str,
        key: String,
        message: String,
    },
    /// A stored envelope could not be decoded back into a value.
    #[error("malformed cache envelope: {0}")]
    Malformed(String),
    /// The wrapped computation itself failed.
    ///
    /// This is never written to the store; the next call for the same key
    /// invokes the computation again.
    #[error("computation failed: {0}")]
    Computation(String),
    /// The in-flight computation was dropped before producing a result.
    #[error("computation channel dropped")]
    Interrupted,
    /// The configuration is not usable as given.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Creates a [`CacheError::Store`] with operation and key context.
    pub fn store(op: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Self::Store {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
