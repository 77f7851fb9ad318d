//! Error types shared across pairlink crates.

use thiserror::Error;

/// Errors raised while normalizing a raw notification.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The payload is missing a field the engine cannot work without.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The payload is structurally malformed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The event kind is one the engine does not replicate.
    #[error("unhandled event kind: {0}")]
    UnhandledEvent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NormalizeError::MissingField("issue.key");
        assert_eq!(err.to_string(), "missing required field: issue.key");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NormalizeError>();
    }
}
