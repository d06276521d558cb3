//! Downstream notification sinks.

pub mod email;
pub mod hass;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::message::CanonicalMessage;

pub use email::EmailSink;
pub use hass::HassSink;

/// Result of one sink delivery attempt. Consumed for logging only;
/// never persisted, never retried.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub sink_name: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn ok(sink_name: &'static str) -> Self {
        Self {
            sink_name,
            success: true,
            error: None,
        }
    }

    pub fn failed(sink_name: &'static str, error: impl ToString) -> Self {
        Self {
            sink_name,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// A downstream notification target. Implementations own their sink
/// configuration; the dispatcher only constructs sinks that are enabled.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt one delivery. Errors are converted to failed outcomes by
    /// the dispatcher and never cross into sibling sinks.
    async fn deliver(&self, message: &CanonicalMessage) -> Result<(), SinkError>;
}
