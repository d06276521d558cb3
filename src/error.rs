//! Error types for the relay.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration file {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink delivery errors. Caught by the dispatcher and turned into a
/// failed outcome; never propagated to the intake caller.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink {sink} is missing required configuration: {field}")]
    MissingField {
        sink: &'static str,
        field: &'static str,
    },

    #[error("Failed to build message for sink {sink}: {reason}")]
    BuildFailed { sink: &'static str, reason: String },

    #[error("Delivery via sink {sink} failed: {reason}")]
    SendFailed { sink: &'static str, reason: String },

    #[error("Sink {sink} timed out after {seconds}s")]
    Timeout { sink: &'static str, seconds: u64 },
}

/// SMTP session transport errors. Terminate one session; never reach
/// the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum SmtpSessionError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
