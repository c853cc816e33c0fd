//! Error types shared by every adblib crate

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error raised by caller-supplied code (collectors, progress callbacks)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a channel that was closed, either explicitly or
    /// because an earlier operation timed out or was cancelled.
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────
    /// The ADB server (or device daemon) answered `FAIL`. The reason is kept verbatim.
    #[error("ADB FAIL response: {message}")]
    FailResponse { message: String },

    #[error("ADB protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Caller Errors
    // ─────────────────────────────────────────────────────────────
    /// Raised by a caller-supplied collector or progress callback
    #[error("{0}")]
    Collector(BoxError),

    // ─────────────────────────────────────────────────────────────
    // Session / Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("ADB session has been closed")]
    SessionClosed,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Timeout raised when a deadline of `duration` elapsed during `operation`
    pub fn timeout_after(operation: &str, duration: Duration) -> Self {
        Self::Timeout {
            message: format!("{} did not complete within {:?}", operation, duration),
        }
    }

    pub fn fail_response(message: impl Into<String>) -> Self {
        Self::FailResponse {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error raised by caller code
    pub fn collector(err: impl Into<BoxError>) -> Self {
        Self::Collector(err.into())
    }

    /// Check if this error was caused by a deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if this error reports a closed channel or session
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ChannelClosed | Error::SessionClosed)
    }

    /// Check if retrying the operation on a fresh connection can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ChannelClosed | Error::Timeout { .. } | Error::Protocol { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::debug!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::debug!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::fail_response("device 'abcd' not found");
        assert_eq!(
            err.to_string(),
            "ADB FAIL response: device 'abcd' not found"
        );

        let err = Error::ChannelClosed;
        assert_eq!(err.to_string(), "Channel closed");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_timeout_after_mentions_operation() {
        let err = Error::timeout_after("shell command", Duration::from_millis(100));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("shell command"));
        assert!(err.to_string().contains("100ms"));
    }

    #[test]
    fn test_collector_error_keeps_source_message() {
        #[derive(Debug)]
        struct MyError;
        impl std::fmt::Display for MyError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "collector exploded")
            }
        }
        impl std::error::Error for MyError {}

        let err = Error::collector(MyError);
        assert_eq!(err.to_string(), "collector exploded");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_is_closed() {
        assert!(Error::ChannelClosed.is_closed());
        assert!(Error::SessionClosed.is_closed());
        assert!(!Error::protocol("bad").is_closed());
    }

    #[test]
    fn test_fail_response_is_not_recoverable() {
        assert!(!Error::fail_response("closed").is_recoverable());
        assert!(!Error::SessionClosed.is_recoverable());
    }

    #[test]
    fn test_result_ext_preserves_error() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe",
        ));
        let err = result.context("writing request").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
