//! Error types for the murmur orchestrator.
//!
//! [`MurmurError`] is the top-level error; [`ChannelError`] covers transport
//! failures and carries the retryability split the outbound dispatcher
//! relies on. Both are non-exhaustive to allow future extension.

use thiserror::Error;

/// Transport error reasons that must never be retried.
///
/// Everything not in this list is treated as transient by the dispatcher.
pub const NON_RETRYABLE_REASONS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "channel_not_found",
    "chat_id_required",
    "bot_token_missing",
    "permission_denied",
    "invalid_arguments",
];

/// Top-level error type for the murmur orchestrator.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MurmurError {
    /// An LLM provider returned an error envelope.
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error body.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Secret placeholders could not be resolved; execution is blocked.
    #[error("secret resolution failed: {notice}")]
    SecretResolution {
        /// User-facing notice listing missing keys / invalid ciphertexts.
        notice: String,
    },

    /// Arguments or addressing were invalid (unknown provider, empty chat).
    #[error("validation error: {0}")]
    Validation(String),

    /// A persistent store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A channel-layer error bubbled up.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Internal invariant broken (bus closed, worker poisoned).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Channel-transport error type.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ChannelError {
    /// No transport is registered for the requested provider.
    #[error("channel_not_registered:{0}")]
    NotRegistered(String),

    /// Sending a message failed; `reason` is a provider error code.
    #[error("send failed: {reason}")]
    SendFailed {
        /// Provider error code (e.g. `rate_limited`, `invalid_auth`).
        reason: String,
    },

    /// Reading messages failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Authentication / authorization was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Starting the transport failed.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// Catch-all for errors that do not fit other variants.
    #[error("{0}")]
    Other(String),
}

impl ChannelError {
    /// Whether the dispatcher may retry after this error.
    ///
    /// Auth and addressing failures are permanent; everything else is
    /// assumed transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotRegistered(_) | Self::AuthFailed(_) => false,
            Self::SendFailed { reason } => {
                !NON_RETRYABLE_REASONS.iter().any(|r| reason.starts_with(r))
            }
            Self::ReceiveFailed(_) | Self::StartFailed(_) | Self::Other(_) => true,
        }
    }

    /// Short reason code for DLQ records and logs.
    pub fn reason(&self) -> String {
        match self {
            Self::NotRegistered(p) => format!("channel_not_registered:{p}"),
            Self::SendFailed { reason } => reason.clone(),
            Self::ReceiveFailed(r) => format!("receive_failed:{r}"),
            Self::AuthFailed(r) => format!("invalid_auth:{r}"),
            Self::StartFailed(r) => format!("start_failed:{r}"),
            Self::Other(r) => r.clone(),
        }
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MurmurError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split() {
        assert!(
            ChannelError::SendFailed {
                reason: "rate_limited".into()
            }
            .is_retryable()
        );
        assert!(
            ChannelError::SendFailed {
                reason: "timeout".into()
            }
            .is_retryable()
        );
        for reason in NON_RETRYABLE_REASONS {
            let err = ChannelError::SendFailed {
                reason: (*reason).to_string(),
            };
            assert!(!err.is_retryable(), "{reason} must not be retried");
        }
    }

    #[test]
    fn not_registered_is_permanent() {
        let err = ChannelError::NotRegistered("matrix".into());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "channel_not_registered:matrix");
    }

    #[test]
    fn reason_codes() {
        let err = ChannelError::SendFailed {
            reason: "channel_not_found".into(),
        };
        assert_eq!(err.reason(), "channel_not_found");

        let err = ChannelError::AuthFailed("bad token".into());
        assert!(err.reason().starts_with("invalid_auth"));
    }

    #[test]
    fn murmur_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MurmurError = io_err.into();
        assert!(matches!(err, MurmurError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn murmur_error_from_channel() {
        let err: MurmurError = ChannelError::Other("boom".into()).into();
        assert!(matches!(err, MurmurError::Channel(_)));
    }

    #[test]
    fn result_alias_works() {
        fn err_fn() -> Result<i32> {
            Err(MurmurError::Validation("empty chat_id".into()))
        }
        assert!(err_fn().is_err());
    }
}
