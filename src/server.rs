use std::sync::Arc;

use anyhow::{Context, Result};
use request_http_parser::parser::{Method, Request};
use serde_json::json;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::oneshot::Receiver,
};
use tracing::{debug, error, info, warn};

use crate::{notification::handler, notification::svc::Notifier, store::SubscriptionRepository};

pub const OK_RESPONSE: &str = "HTTP/1.1 200 OK";
pub const NO_CONTENT: &str = "HTTP/1.1 204 No Content";
pub const BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request";
pub const NOT_FOUND: &str = "HTTP/1.1 404 Not Found";
pub const INTERNAL_SERVER_ERROR: &str = "HTTP/1.1 500 Internal Server Error";

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
            Access-Control-Allow-Methods: GET, POST, DELETE, OPTIONS\r\n\
            Access-Control-Allow-Headers: Content-Type\r\n\
            Access-Control-Max-Age: 86400\r\n";

pub const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub repository: Arc<dyn SubscriptionRepository>,
    pub notifier: Notifier,
    pub vapid_public_key: String,
}

pub struct Server {}

impl Server {
    pub async fn start(
        listener: TcpListener,
        state: Arc<AppState>,
        mut shutdown_rx: Receiver<()>,
    ) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "server running");

        loop {
            tokio::select! {
                conn = listener.accept() => {
                    let (mut stream, peer) = match conn {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    let state = state.clone();
                    tokio::spawn(async move {
                        let (reader, writer) = stream.split();
                        if let Err(e) = Self::handle_client(reader, writer, &state).await {
                            error!(peer = %peer, error = %e, "connection error");
                        }
                    });
                }
                _ = &mut shutdown_rx => {
                    info!("shutting down server");
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn handle_client<Reader, Writer>(
        mut reader: Reader,
        mut writer: Writer,
        state: &AppState,
    ) -> Result<()>
    where
        Reader: AsyncRead + Unpin,
        Writer: AsyncWrite + Unpin,
    {
        let raw = match read_request(&mut reader).await? {
            RawRequest::Empty => return Ok(()),
            RawRequest::TooLarge => {
                warn!("request too large");
                return write_response(
                    &mut writer,
                    BAD_REQUEST,
                    &json!({ "error": "Request too large" }).to_string(),
                )
                .await;
            }
            RawRequest::Complete(raw) => raw,
        };

        let request = match Request::new(&raw) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "malformed request");
                return write_response(
                    &mut writer,
                    BAD_REQUEST,
                    &json!({ "error": e.to_string() }).to_string(),
                )
                .await;
            }
        };

        let path = request.path.as_str();
        let body = request.body.as_deref();
        debug!(path, "incoming request");

        // Router
        let (status, content) = match (&request.method, path) {
            (Method::OPTIONS, _) => (NO_CONTENT, String::new()),
            (Method::GET, "/health") => (OK_RESPONSE, json!({ "status": "ok" }).to_string()),
            (Method::GET, "/api/push/vapid-public-key") => handler::vapid_public_key(state),
            (Method::POST, "/api/push/subscribe") => handler::register_subs(body, state).await,
            (Method::DELETE, "/api/push/subscribe") => handler::unregister_subs(body, state).await,
            (Method::POST, "/api/push/send") => handler::push_notification(body, state).await,
            _ => (NOT_FOUND, json!({ "error": "Not Found" }).to_string()),
        };

        write_response(&mut writer, status, &content).await
    }
}

enum RawRequest {
    Empty,
    TooLarge,
    Complete(String),
}

async fn read_request<Reader>(reader: &mut Reader) -> Result<RawRequest>
where
    Reader: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let size = reader
            .read(&mut chunk)
            .await
            .context("Failed to read stream")?;
        if size == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..size]);
        if buffer.len() > MAX_REQUEST_SIZE {
            return Ok(RawRequest::TooLarge);
        }
        if is_complete(&buffer) {
            break;
        }
    }
    if buffer.is_empty() {
        return Ok(RawRequest::Empty);
    }
    Ok(RawRequest::Complete(
        String::from_utf8_lossy(&buffer).into_owned(),
    ))
}

/// Head received and, when announced, the whole body too.
fn is_complete(buffer: &[u8]) -> bool {
    let Some(head_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buffer[..head_end]);
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buffer.len() >= head_end + 4 + content_length
}

async fn write_response<Writer>(writer: &mut Writer, status: &str, content: &str) -> Result<()>
where
    Writer: AsyncWrite + Unpin,
{
    let content_type = if content.is_empty() {
        ""
    } else {
        "Content-Type: application/json\r\n"
    };
    let response = format!(
        "{status}\r\n{CORS_HEADERS}{content_type}Content-Length: {}\r\nConnection: close\r\n\r\n{content}",
        content.len()
    );
    writer
        .write_all(response.as_bytes())
        .await
        .context("Failed to write")?;
    writer.flush().await.context("Failed to flush")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_complete_waits_for_body() {
        let head = b"POST /api/push/send HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        assert!(!is_complete(head));
        let mut full = head.to_vec();
        full.extend_from_slice(b"{}   ");
        assert!(is_complete(&full));
        assert!(is_complete(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(!is_complete(b"GET /health HTTP/1.1\r\nHost: x\r\n"));
    }

    #[tokio::test]
    async fn test_write_response_sets_length() {
        let mut out = Vec::new();
        write_response(&mut out, OK_RESPONSE, "{\"a\":1}").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *"));
        assert!(text.ends_with("\r\n\r\n{\"a\":1}"));
    }
}
