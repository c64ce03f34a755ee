//! Error types shared across the CLI.
//!
//! Every failure the tool can surface maps to one variant, and every variant
//! maps to a stable process exit code so scripts can tell connection trouble
//! from server trouble from a broken config file.

use thiserror::Error;

/// Top-level error for a single invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid invocation, or any failure without a more specific kind.
    #[error("{0}")]
    Usage(String),

    /// The Ollama host could not be reached at the transport level.
    #[error("Cannot reach Ollama host: {reason}")]
    Unreachable { reason: String },

    /// The request exceeded the configured timeout.
    #[error("Request timed out.")]
    Timeout,

    /// The server answered, but with an error or an unusable payload.
    #[error("{0}")]
    Api(String),

    /// Invalid persisted configuration or a missing required credential.
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    pub fn api(message: impl Into<String>) -> Self {
        Error::Api(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Process exit code surfaced by `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) | Error::Io(_) => 1,
            Error::Unreachable { .. } | Error::Timeout => 2,
            Error::Api(_) => 3,
            Error::Config(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(Error::usage("bad flags").exit_code(), 1);
        assert_eq!(
            Error::Unreachable {
                reason: "connection refused".to_string()
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::Timeout.exit_code(), 2);
        assert_eq!(Error::api("model not found").exit_code(), 3);
        assert_eq!(Error::config("bad config").exit_code(), 4);
    }

    #[test]
    fn test_display_uses_message_verbatim() {
        let err = Error::api("model not found");
        assert_eq!(err.to_string(), "model not found");

        let err = Error::Unreachable {
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot reach Ollama host: connection refused");
    }
}
