//! Fan-out dispatcher — one canonical message to every enabled sink,
//! concurrently, with per-sink failure isolation.

use std::time::Duration;

use futures::future::join_all;

use crate::config::RelayConfig;
use crate::error::SinkError;
use crate::message::CanonicalMessage;
use crate::sinks::{DeliveryOutcome, EmailSink, HassSink, Sink};

/// Default bound on one sink delivery. A hung downstream provider must not
/// accumulate unbounded concurrent sessions.
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Dispatcher {
    sink_timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            sink_timeout: SINK_TIMEOUT,
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_timeout(sink_timeout: Duration) -> Self {
        Self { sink_timeout }
    }

    /// Deliver `message` to every sink enabled in `config`. Sinks run
    /// concurrently; one sink's error or timeout yields a failed outcome
    /// for that sink only. All outcomes are logged and returned — intake
    /// callers use only the aggregate completion, never individual results.
    pub async fn dispatch(
        &self,
        message: &CanonicalMessage,
        config: &RelayConfig,
    ) -> Vec<DeliveryOutcome> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        if config.gmail.enabled {
            tracing::info!("email forwarding enabled");
            sinks.push(Box::new(EmailSink::new(config.gmail.clone())));
        }
        if config.hass.enabled {
            tracing::info!(host = %config.hass.host, "hass notification enabled");
            sinks.push(Box::new(HassSink::new(config.hass.clone())));
        }

        let deliveries = sinks.iter().map(|sink| async move {
            let name = sink.name();
            match tokio::time::timeout(self.sink_timeout, sink.deliver(message)).await {
                Ok(Ok(())) => DeliveryOutcome::ok(name),
                Ok(Err(e)) => DeliveryOutcome::failed(name, e),
                Err(_) => DeliveryOutcome::failed(
                    name,
                    SinkError::Timeout {
                        sink: name,
                        seconds: self.sink_timeout.as_secs(),
                    },
                ),
            }
        });

        let outcomes = join_all(deliveries).await;
        for outcome in &outcomes {
            if outcome.success {
                tracing::info!(sink = outcome.sink_name, "delivery succeeded");
            } else {
                tracing::error!(
                    sink = outcome.sink_name,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "delivery failed"
                );
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GmailConfig, HassConfig};

    fn disabled_config() -> RelayConfig {
        RelayConfig {
            gmail: GmailConfig::default(),
            hass: HassConfig::default(),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn no_enabled_sinks_means_no_outcomes() {
        let dispatcher = Dispatcher::new();
        let msg = CanonicalMessage::new("S", "M");
        let outcomes = dispatcher.dispatch(&msg, &disabled_config()).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn hass_network_failure_is_isolated_to_hass() {
        let mut config = disabled_config();
        config.hass = HassConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            // Nothing listens here; the connection is refused immediately.
            port: 9,
            target: "t".into(),
            key: "k".into(),
        };

        let dispatcher = Dispatcher::new();
        let msg = CanonicalMessage::new("Foo", "Foo bar");
        let outcomes = dispatcher.dispatch(&msg, &config).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].sink_name, "hass");
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.is_some());
    }

    #[tokio::test]
    async fn misconfigured_enabled_sink_fails_without_crashing() {
        let mut config = disabled_config();
        // Enabled but missing credentials: must surface as a failed outcome
        // for gmail only, not an error out of dispatch.
        config.gmail.enabled = true;

        let dispatcher = Dispatcher::new();
        let msg = CanonicalMessage::new("S", "M");
        let outcomes = dispatcher.dispatch(&msg, &config).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].sink_name, "gmail");
        assert!(!outcomes[0].success);
    }

    #[tokio::test]
    async fn slow_sink_times_out_as_failed_outcome() {
        use std::net::TcpListener;

        // A listener that accepts but never responds, to force the
        // dispatcher-level timeout rather than a connect error.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let _conns: Vec<_> = listener.incoming().take(1).collect();
            std::thread::sleep(std::time::Duration::from_secs(5));
        });

        let mut config = disabled_config();
        config.hass = HassConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port,
            target: "t".into(),
            key: "k".into(),
        };

        let dispatcher = Dispatcher::with_timeout(Duration::from_millis(250));
        let msg = CanonicalMessage::new("S", "M");
        let outcomes = dispatcher.dispatch(&msg, &config).await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
    }
}
