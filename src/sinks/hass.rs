//! Home Assistant push-notification sink — bearer-authenticated JSON POST
//! to the notify service REST endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::HassConfig;
use crate::error::SinkError;
use crate::message::CanonicalMessage;
use crate::sinks::Sink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Optional notification attachment. Both fields must be present for the
/// attachment payload to be emitted.
#[derive(Debug, Clone)]
pub struct HassAttachment {
    pub url: String,
    pub content_type: String,
}

pub struct HassSink {
    config: HassConfig,
    client: reqwest::Client,
}

impl HassSink {
    pub fn new(config: HassConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    fn require(&self, field: &'static str, value: &str) -> Result<(), SinkError> {
        if value.is_empty() {
            return Err(SinkError::MissingField { sink: "hass", field });
        }
        Ok(())
    }

    /// Notify service URL for the configured instance.
    pub fn notify_url(&self) -> String {
        format!(
            "http://{}:{}/api/services/notify/{}",
            self.config.host, self.config.port, self.config.target
        )
    }

    /// Send one notification. Network errors, timeouts, and non-success
    /// statuses all come back as `SinkError`, never panics.
    pub async fn notify(
        &self,
        text: &str,
        attachment: Option<&HassAttachment>,
    ) -> Result<(), SinkError> {
        self.require("host", &self.config.host)?;
        self.require("target", &self.config.target)?;
        self.require("key", &self.config.key)?;

        let url = self.notify_url();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.key)
            .json(&build_payload(text, attachment))
            .send()
            .await
            .map_err(|e| SinkError::SendFailed {
                sink: "hass",
                reason: format!("Request to {url} failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::SendFailed {
                sink: "hass",
                reason: format!("Home Assistant returned {status}"),
            });
        }

        tracing::debug!(%status, "hass notify response");
        Ok(())
    }
}

/// Build the notify payload. The attachment block is only nested when a
/// complete attachment (URL and content type) is supplied.
pub fn build_payload(text: &str, attachment: Option<&HassAttachment>) -> Value {
    let mut payload = json!({ "message": text });
    if let Some(att) = attachment
        && !att.url.is_empty()
        && !att.content_type.is_empty()
    {
        payload["data"] = json!({
            "attachment": {
                "url": att.url,
                "hide-thumbnail": false,
            }
        });
    }
    payload
}

#[async_trait]
impl Sink for HassSink {
    fn name(&self) -> &'static str {
        "hass"
    }

    async fn deliver(&self, message: &CanonicalMessage) -> Result<(), SinkError> {
        // The subject text is what gets pushed to Home Assistant, matching
        // the behavior existing automations depend on.
        // TODO: confirm with the product owner whether the notification
        // should carry the body instead of the subject.
        self.notify(&message.subject, None).await
    }
}
