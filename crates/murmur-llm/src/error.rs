//! Provider error type.

use thiserror::Error;

/// Errors returned by [`ChatProvider`](crate::ChatProvider) implementations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider returned an error envelope.
    #[error("provider_error:{provider}:{body}")]
    Api {
        /// Provider id.
        provider: String,
        /// Error body, trimmed by the caller before display.
        body: String,
    },

    /// Authentication was rejected.
    #[error("provider auth failed: {0}")]
    Auth(String),

    /// The request was aborted via its cancellation signal.
    #[error("request aborted")]
    Aborted,

    /// The request exceeded its wall-clock timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Transport-level failure (connect, TLS, read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Convenience alias for provider results.
pub type Result<T> = std::result::Result<T, ProviderError>;
