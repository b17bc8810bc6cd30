//! HTTP server: accept loop, routing and shared state

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::logging::UsageLogger;
use crate::provider::ProviderDirectory;
use crate::registry::HandleRegistry;
use crate::routes;
use crate::server::websocket;
use crate::service::ServiceSet;
use crate::types::Result;

pub type HttpBody = BoxBody<Bytes, hyper::Error>;

/// Process-wide state shared by every connection
pub struct AppState {
    pub args: Args,
    pub directory: Arc<ProviderDirectory>,
    pub registry: Arc<HandleRegistry>,
    pub services: Arc<ServiceSet>,
    pub usage: UsageLogger,
    /// Currently open WebSocket sessions
    pub sessions: AtomicUsize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        directory: ProviderDirectory,
        services: ServiceSet,
        usage: UsageLogger,
    ) -> Self {
        let registry = HandleRegistry::new(args.max_handles);
        Self {
            args,
            directory: Arc::new(directory),
            registry: Arc::new(registry),
            services: Arc::new(services),
            usage,
            sessions: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }
}

/// Bind the configured address and serve until the process exits.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!(
        "Keyward listening on {} as server {}",
        listener.local_addr()?,
        state.args.server_id
    );
    serve(listener, state).await
}

/// Serve connections from an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<HttpBody>, hyper::Error> {
    let path = req.uri().path().to_string();

    if hyper_tungstenite::is_upgrade_request(&req) {
        if path == "/" || path == "/ws" {
            return Ok(to_boxed(websocket::handle_upgrade(state, addr, req)));
        }
        return Ok(to_boxed(not_found_response(&path)));
    }

    let response = match (req.method(), path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => routes::health_check(&state),
        (&Method::GET, "/version") => routes::version_info(),
        _ => not_found_response(&path),
    };
    Ok(to_boxed(response))
}

pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<HttpBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// JSON response with permissive CORS for the local page
pub fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": format!("Not found: {path}") });
    json_response(StatusCode::NOT_FOUND, body.to_string())
}

pub fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message });
    json_response(StatusCode::BAD_REQUEST, body.to_string())
}
