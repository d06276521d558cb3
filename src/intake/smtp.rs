//! SMTP intake listener — accepts a mail session, buffers the DATA
//! payload, hands it to the normalizer and dispatcher, and always answers
//! `250 Message accepted for delivery`. Intake commits to accepting the
//! message before any sink outcome is known; delivery is best-effort and
//! failures are visible only in the logs.
//!
//! One listener runs plaintext, a second offers STARTTLS with a
//! self-signed certificate generated at startup.

use std::sync::Arc;

use anyhow::{Context, Result};
use rcgen::generate_simple_self_signed;
use rustls::ServerConfig as RustlsServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::SmtpSessionError;
use crate::message::normalize;

const GREETING: &str = "220 mail-relay ESMTP service ready";
const ACCEPTED: &str = "250 Message accepted for delivery";

/// Shared per-listener context, cloned into each connection task.
#[derive(Clone)]
pub struct SmtpContext {
    pub dispatcher: Arc<Dispatcher>,
    /// Config snapshot fixed at listener startup. The HTTP intake re-reads
    /// live config per request; the SMTP path deliberately does not.
    pub config: Arc<RelayConfig>,
}

/// An SMTP intake listener bound to one port. `tls` marks the listener
/// STARTTLS-capable; the plaintext listener rejects STARTTLS with 502.
pub struct SmtpListener {
    context: SmtpContext,
    tls: Option<TlsAcceptor>,
}

impl SmtpListener {
    pub fn plaintext(context: SmtpContext) -> Self {
        Self { context, tls: None }
    }

    pub fn with_starttls(context: SmtpContext, acceptor: TlsAcceptor) -> Self {
        Self {
            context,
            tls: Some(acceptor),
        }
    }

    /// Accept loop. Runs until `shutdown` flips; each connection gets its
    /// own task so sessions never block each other.
    pub async fn run(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let label = if self.tls.is_some() { "TLS" } else { "SMTP" };
        match listener.local_addr() {
            Ok(addr) => info!(%addr, label, "SMTP listener started"),
            Err(_) => info!(label, "SMTP listener started"),
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(%peer, label, "New connection");
                            let context = self.context.clone();
                            let tls = self.tls.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, tls, context).await {
                                    warn!(%peer, error = %e, "SMTP session ended with error");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(label, "SMTP listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Generate a self-signed certificate and build a TLS acceptor for the
/// STARTTLS-capable listener.
pub fn self_signed_acceptor() -> Result<TlsAcceptor> {
    let certified_key = generate_simple_self_signed(vec!["localhost".to_string()])
        .context("Failed to generate self-signed certificate")?;

    let cert = CertificateDer::from(certified_key.cert.der().to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified_key.key_pair.serialize_der(),
    ));

    let tls_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .context("Failed to build rustls server config")?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// How a session loop ended.
enum SessionEnd {
    /// Client quit or disconnected.
    Closed,
    /// Client negotiated STARTTLS; the 220 go-ahead has been written.
    UpgradeTls,
}

async fn handle_connection(
    mut stream: TcpStream,
    tls: Option<TlsAcceptor>,
    context: SmtpContext,
) -> Result<(), SmtpSessionError> {
    let starttls_offered = tls.is_some();
    match serve_session(&mut stream, starttls_offered, true, &context).await? {
        SessionEnd::Closed => Ok(()),
        SessionEnd::UpgradeTls => {
            // tls is Some here: UpgradeTls is only reachable when offered.
            let acceptor = tls.ok_or_else(|| {
                SmtpSessionError::TlsHandshake("STARTTLS accepted without acceptor".into())
            })?;
            let mut tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| SmtpSessionError::TlsHandshake(e.to_string()))?;
            debug!("STARTTLS handshake complete");
            // Fresh session state over the encrypted stream; the client
            // re-issues EHLO, so no second greeting. No further upgrades.
            serve_session(&mut tls_stream, false, false, &context).await?;
            Ok(())
        }
    }
}

/// One SMTP session over any byte stream (plain socket or TLS). The
/// business logic only ever sees the buffered DATA payload; the protocol
/// session object stays in here.
async fn serve_session<S>(
    stream: &mut S,
    starttls_offered: bool,
    greet: bool,
    context: &SmtpContext,
) -> Result<SessionEnd, SmtpSessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    if greet {
        write_line(&mut stream, GREETING).await?;
    }

    let mut mail_from: Option<String> = None;
    let mut rcpt_to: Vec<String> = Vec::new();

    loop {
        let line = match read_line(&mut stream).await? {
            Some(line) => line,
            // EOF outside DATA: client went away, not an error.
            None => return Ok(SessionEnd::Closed),
        };
        let command = line.to_ascii_uppercase();

        if command.starts_with("EHLO") {
            if starttls_offered {
                write_line(&mut stream, "250-mail-relay\r\n250 STARTTLS").await?;
            } else {
                write_line(&mut stream, "250 mail-relay").await?;
            }
        } else if command.starts_with("HELO") {
            write_line(&mut stream, "250 mail-relay").await?;
        } else if command.starts_with("MAIL FROM:") {
            mail_from = Some(line["MAIL FROM:".len()..].trim().to_string());
            write_line(&mut stream, "250 OK").await?;
        } else if command.starts_with("RCPT TO:") {
            if mail_from.is_none() {
                write_line(&mut stream, "503 Error: need MAIL command").await?;
            } else {
                rcpt_to.push(line["RCPT TO:".len()..].trim().to_string());
                write_line(&mut stream, "250 OK").await?;
            }
        } else if command.starts_with("DATA") {
            if mail_from.is_none() || rcpt_to.is_empty() {
                write_line(&mut stream, "503 Error: need RCPT command").await?;
                continue;
            }
            write_line(&mut stream, "354 End data with <CR><LF>.<CR><LF>").await?;
            let payload = read_data(&mut stream).await?;

            debug!(from = mail_from.as_deref().unwrap_or(""), "Message received");
            debug!(recipients = ?rcpt_to, "Message for");

            let message = normalize(&payload);
            // Accept-then-best-effort: outcomes are awaited for logging,
            // but the 250 below never depends on them.
            context.dispatcher.dispatch(&message, &context.config).await;

            write_line(&mut stream, ACCEPTED).await?;
            mail_from = None;
            rcpt_to.clear();
        } else if command.starts_with("RSET") {
            mail_from = None;
            rcpt_to.clear();
            write_line(&mut stream, "250 OK").await?;
        } else if command.starts_with("NOOP") {
            write_line(&mut stream, "250 OK").await?;
        } else if command.starts_with("STARTTLS") {
            if starttls_offered {
                write_line(&mut stream, "220 Ready to start TLS").await?;
                return Ok(SessionEnd::UpgradeTls);
            }
            write_line(&mut stream, "502 Command not implemented").await?;
        } else if command.starts_with("QUIT") {
            write_line(&mut stream, "221 Bye").await?;
            return Ok(SessionEnd::Closed);
        } else {
            write_line(&mut stream, "502 Command not implemented").await?;
        }
    }
}

/// Read one CRLF-terminated command line, decoded lossily so stray bytes
/// cannot kill the session. `None` on EOF.
async fn read_line<S>(stream: &mut BufReader<S>) -> Result<Option<String>, SmtpSessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let n = stream.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).to_string()))
}

/// Buffer the raw DATA payload until the lone-dot terminator, undoing dot
/// stuffing. Bytes are kept as-is; decoding is the normalizer's problem.
/// EOF mid-DATA is a transport fault.
async fn read_data<S>(stream: &mut BufReader<S>) -> Result<Vec<u8>, SmtpSessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut payload = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = stream.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(SmtpSessionError::ConnectionClosed);
        }
        while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            line.pop();
        }
        if line == b"." {
            return Ok(payload);
        }
        // The lone-dot case is handled above, so one leading dot here is
        // stuffing and comes off.
        payload.extend_from_slice(line.strip_prefix(b".").unwrap_or(&line));
        payload.extend_from_slice(b"\r\n");
    }
}

async fn write_line<S>(stream: &mut BufReader<S>, line: &str) -> Result<(), SmtpSessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}
