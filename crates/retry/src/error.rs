use thiserror::Error;

/// Why a retried operation gave up.
///
/// Callers are expected to inspect the wrapped cause (see [`RetryError::cause`])
/// rather than the wrapper itself.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired before or between attempts.
    #[error("operation cancelled")]
    Cancelled,

    /// The classifier marked the error as terminal.
    #[error("unretryable error: {0}")]
    Unretryable(#[source] E),

    /// Every permitted attempt failed with a retryable error.
    #[error("all {attempts} attempts failed: {last}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E> {
    /// Returns the underlying error, if the operation ran at least once.
    pub fn cause(&self) -> Option<&E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Unretryable(cause) => Some(cause),
            RetryError::AttemptsExhausted { last, .. } => Some(last),
        }
    }

    /// Consumes the wrapper, returning the underlying error.
    pub fn into_cause(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Unretryable(cause) => Some(cause),
            RetryError::AttemptsExhausted { last, .. } => Some(last),
        }
    }

    /// Returns true if the retrier stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}
