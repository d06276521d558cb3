use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{RwLock, watch};

use mail_relay::config::RelayConfig;
use mail_relay::dispatch::Dispatcher;
use mail_relay::intake::http::api_routes;
use mail_relay::intake::smtp::{self, SmtpContext, SmtpListener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config_path = RelayConfig::default_path();
    let config = Arc::new(RelayConfig::load_or_init(&config_path)?);

    eprintln!("mail-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", config_path.display());
    eprintln!("   SMTP:   0.0.0.0:{}", config.smtp_port);
    eprintln!("   TLS:    0.0.0.0:{}", config.tls_port);
    eprintln!("   API:    http://0.0.0.0:{}/send_message", config.api_port);
    eprintln!("   CTRL-C to exit\n");

    let dispatcher = Arc::new(Dispatcher::new());

    // SMTP listeners use the startup config snapshot; the HTTP path reads
    // live config so out-of-band updates apply per request.
    let context = SmtpContext {
        dispatcher: Arc::clone(&dispatcher),
        config: Arc::clone(&config),
    };
    let live_config = Arc::new(RwLock::new((*config).clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind everything up front so a taken port fails the process at startup.
    let plain_socket = TcpListener::bind(("0.0.0.0", config.smtp_port)).await?;
    let tls_socket = TcpListener::bind(("0.0.0.0", config.tls_port)).await?;
    let api_socket = TcpListener::bind(("0.0.0.0", config.api_port)).await?;

    let acceptor = smtp::self_signed_acceptor()?;

    let plain = SmtpListener::plaintext(context.clone());
    let plain_handle = tokio::spawn(plain.run(plain_socket, shutdown_rx.clone()));

    let tls = SmtpListener::with_starttls(context, acceptor);
    let tls_handle = tokio::spawn(tls.run(tls_socket, shutdown_rx.clone()));

    let app = api_routes(live_config, dispatcher);
    let mut api_shutdown = shutdown_rx;
    let api_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = api_shutdown.changed().await;
        };
        if let Err(e) = axum::serve(api_socket, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("SMTP relay started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, stopping listeners");

    let _ = shutdown_tx.send(true);
    // Stop in reverse order of start.
    let _ = api_handle.await;
    let _ = tls_handle.await;
    let _ = plain_handle.await;

    Ok(())
}
