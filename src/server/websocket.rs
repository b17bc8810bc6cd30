//! WebSocket upgrade and per-connection session loop
//!
//! Each connection gets one [`Session`]. Inbound binary messages are
//! dispatched on their own task so slow actions never block the reader;
//! encoded results funnel through an mpsc channel into a single writer task.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use crate::server::http::{bad_request_response, AppState};
use crate::session::Session;
use crate::types::{KeywardError, Result};

type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Outbound queue depth per connection
const OUTBOUND_BUFFER: usize = 256;

/// Accept a WebSocket upgrade and spawn the session for it.
pub fn handle_upgrade(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let origin = request_origin(&req);

    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            debug!("WebSocket upgrade from {} (origin: {})", addr, origin);
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => {
                        if let Err(e) = run_session(state, ws, origin).await {
                            warn!("Session from {} ended with error: {}", addr, e);
                        }
                    }
                    Err(e) => {
                        error!("WebSocket upgrade failed: {:?}", e);
                    }
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            bad_request_response(&format!("WebSocket upgrade failed: {e}"))
        }
    }
}

/// `Origin` header, then `origin` query parameter, then `"unknown"`.
fn request_origin<B>(req: &Request<B>) -> String {
    req.headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| origin_from_query(req.uri().query()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn origin_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            if key == "origin" && !value.is_empty() {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
        }
    }
    None
}

/// Drive one connection until the peer disconnects.
async fn run_session(state: Arc<AppState>, ws: HyperWebSocket, origin: String) -> Result<()> {
    let session = Arc::new(Session::new(
        origin,
        state.services.clone(),
        state.directory.clone(),
        state.registry.clone(),
        state.usage.clone(),
    ));
    state.sessions.fetch_add(1, Ordering::AcqRel);
    session.open().await;

    let result = pump(&session, ws).await;

    session.close().await;
    state.sessions.fetch_sub(1, Ordering::AcqRel);
    result
}

async fn pump(session: &Arc<Session>, ws: HyperWebSocket) -> Result<()> {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("WebSocket send failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut outcome = Ok(());
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(frame)) => {
                let session = Arc::clone(session);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(reply) = session.handle_frame(&frame).await {
                        let _ = tx.send(Message::Binary(reply)).await;
                    }
                });
            }
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) => {
                info!(session = %session.id(), "Client closed the connection");
                break;
            }
            Ok(Message::Text(_)) => {
                warn!(session = %session.id(), "Ignoring text frame; actions are binary");
            }
            Ok(_) => {}
            Err(e) => {
                outcome = Err(KeywardError::from(e));
                break;
            }
        }
    }

    // In-flight actions still hold sender clones; once the session is closed
    // they produce nothing and drop them.
    session.close().await;
    drop(tx);
    if let Err(e) = writer.await {
        error!("WebSocket writer task failed: {:?}", e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_from_header() {
        let req = Request::builder()
            .uri("/?origin=https://query.example")
            .header("Origin", "https://header.example")
            .body(())
            .unwrap();
        assert_eq!(request_origin(&req), "https://header.example");
    }

    #[test]
    fn test_origin_from_query() {
        let req = Request::builder()
            .uri("/ws?x=1&origin=app.local")
            .body(())
            .unwrap();
        assert_eq!(request_origin(&req), "app.local");
    }

    #[test]
    fn test_origin_query_is_percent_decoded() {
        let req = Request::builder()
            .uri("/?origin=https%3A%2F%2Fapp.example%3A8443")
            .body(())
            .unwrap();
        assert_eq!(request_origin(&req), "https://app.example:8443");
    }

    #[test]
    fn test_origin_default() {
        let req = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(request_origin(&req), "unknown");
    }
}
