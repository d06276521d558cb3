//! End-to-end fan-out tests: intake → normalizer → dispatcher → Home
//! Assistant sink, against a stub notify endpoint on a random port.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, oneshot, watch};
use tokio::time::timeout;

use mail_relay::config::{HassConfig, RelayConfig};
use mail_relay::dispatch::Dispatcher;
use mail_relay::intake::http::api_routes;
use mail_relay::intake::smtp::{SmtpContext, SmtpListener};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A minimal HTTP server that captures one request verbatim and answers
/// 200 with an empty body.
async fn start_hass_stub() -> (u16, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&request).to_string());
    });

    (port, rx)
}

/// True once the buffered bytes hold the full headers plus the declared
/// content-length worth of body.
fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}

fn hass_config(stub_port: u16) -> RelayConfig {
    RelayConfig {
        hass: HassConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: stub_port,
            target: "t".into(),
            key: "k".into(),
        },
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn smtp_intake_pushes_subject_to_hass() {
    timeout(TEST_TIMEOUT, async {
        use tokio::io::{AsyncBufReadExt, BufReader};
        use tokio::net::TcpStream;

        let (stub_port, captured) = start_hass_stub().await;

        let context = SmtpContext {
            dispatcher: Arc::new(Dispatcher::new()),
            config: Arc::new(hass_config(stub_port)),
        };
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let smtp_port = socket.local_addr().unwrap().port();
        let (_shutdown, rx) = watch::channel(false);
        tokio::spawn(SmtpListener::plaintext(context).run(socket, rx));

        async fn read_reply(
            reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        ) -> String {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            line.trim_end().to_string()
        }

        let stream = TcpStream::connect(("127.0.0.1", smtp_port)).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        read_reply(&mut reader).await; // greeting
        for cmd in ["HELO x", "MAIL FROM:<a@x>", "RCPT TO:<b@x>", "DATA"] {
            write_half
                .write_all(format!("{cmd}\r\n").as_bytes())
                .await
                .unwrap();
            read_reply(&mut reader).await;
        }
        write_half
            .write_all(b"From: a@x\r\nTo: b@x\r\nSubject: Foo\r\n\r\nFoo bar\r\n.\r\n")
            .await
            .unwrap();
        let accept = read_reply(&mut reader).await;
        assert_eq!(accept, "250 Message accepted for delivery");

        let request = captured.await.unwrap();
        assert!(request.starts_with("POST /api/services/notify/t HTTP/1.1"));
        assert!(request.contains("authorization: Bearer k") || request.contains("Authorization: Bearer k"));
        // The subject is what gets pushed, per the wiring existing
        // automations depend on.
        assert!(request.contains(r#""message":"Foo""#));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn http_intake_pushes_subject_to_hass() {
    timeout(TEST_TIMEOUT, async {
        use axum::body::Body;
        use axum::http::{Request, header};
        use tower::ServiceExt;

        let (stub_port, captured) = start_hass_stub().await;
        let config = Arc::new(RwLock::new(hass_config(stub_port)));
        let app = api_routes(config, Arc::new(Dispatcher::new()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/send_message")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"subject":"S","message":"M"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let request = captured.await.unwrap();
        assert!(request.starts_with("POST /api/services/notify/t HTTP/1.1"));
        assert!(request.contains(r#""message":"S""#));
    })
    .await
    .unwrap();
}
