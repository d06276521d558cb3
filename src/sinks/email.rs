//! Gmail forwarding sink — submits the message through Gmail's SMTP
//! relay via lettre. The transport is blocking, so each delivery runs
//! inside `spawn_blocking` and never stalls the accept loops.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;

use crate::config::GmailConfig;
use crate::error::SinkError;
use crate::message::CanonicalMessage;
use crate::sinks::Sink;

const SUBMISSION_HOST: &str = "smtp.gmail.com";

pub struct EmailSink {
    config: GmailConfig,
}

impl EmailSink {
    pub fn new(config: GmailConfig) -> Self {
        Self { config }
    }

    fn require(&self, field: &'static str, value: &str) -> Result<(), SinkError> {
        if value.is_empty() {
            return Err(SinkError::MissingField {
                sink: "gmail",
                field,
            });
        }
        Ok(())
    }
}

/// Re-derive the outbound body: if the relayed text is itself multipart
/// MIME, forward the joined part payloads; otherwise forward it as-is.
pub fn derive_body(body: &str) -> String {
    use mail_parser::MimeHeaders;

    if let Some(parsed) = MessageParser::default().parse(body.as_bytes())
        && parsed
            .content_type()
            .is_some_and(|ct| ct.ctype().eq_ignore_ascii_case("multipart"))
    {
        let mut parts = Vec::new();
        let mut pos = 0;
        while let Some(text) = parsed.body_text(pos) {
            parts.push(text.to_string());
            pos += 1;
        }
        if !parts.is_empty() {
            return parts.join("\n");
        }
    }
    body.to_string()
}

#[async_trait]
impl Sink for EmailSink {
    fn name(&self) -> &'static str {
        "gmail"
    }

    async fn deliver(&self, message: &CanonicalMessage) -> Result<(), SinkError> {
        self.require("username", &self.config.username)?;
        self.require("password", &self.config.password)?;
        self.require("to", &self.config.to)?;

        let config = self.config.clone();
        let subject = message.subject.clone();
        let body = derive_body(&message.body);

        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(config.username.clone(), config.password.clone());

            let transport = SmtpTransport::starttls_relay(SUBMISSION_HOST)
                .map_err(|e| SinkError::SendFailed {
                    sink: "gmail",
                    reason: format!("SMTP relay error: {e}"),
                })?
                .credentials(creds)
                .build();

            let email = Message::builder()
                .from(config.username.parse().map_err(|e| SinkError::BuildFailed {
                    sink: "gmail",
                    reason: format!("Invalid from address: {e}"),
                })?)
                .to(config.to.parse().map_err(|e| SinkError::BuildFailed {
                    sink: "gmail",
                    reason: format!("Invalid to address: {e}"),
                })?)
                .subject(subject)
                .body(body)
                .map_err(|e| SinkError::BuildFailed {
                    sink: "gmail",
                    reason: format!("Failed to build email: {e}"),
                })?;

            transport.send(&email).map_err(|e| SinkError::SendFailed {
                sink: "gmail",
                reason: format!("SMTP send failed: {e}"),
            })?;

            tracing::info!(to = %config.to, "Forwarded message via gmail");
            Ok(())
        })
        .await
        .map_err(|e| SinkError::SendFailed {
            sink: "gmail",
            reason: format!("Delivery task failed: {e}"),
        })?
    }
}
