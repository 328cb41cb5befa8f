use crate::config::Config;
use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::mcp::server::McpServer;
use crate::mcp::types::*;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, Stream};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::IntervalStream, StreamExt as TokioStreamExt};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// HTTP transport for the MCP server: SSE downstream, JSON-RPC POST upstream.
pub struct HttpMcpServer {
    server: Arc<McpServer>,
    api_key: String,
    allowed_origins: Vec<String>,
    authless: bool,
}

impl HttpMcpServer {
    pub fn new(db: Db, config: Config) -> Result<Self> {
        // API key is optional if authless mode is enabled
        let api_key = if config.http_server.authless {
            String::new()
        } else {
            std::env::var(&config.http_server.api_key_env).map_err(|_| {
                OtInvError::Config(format!(
                    "Environment variable {} not set. Set it in your .env file, \
                     or enable authless mode.",
                    config.http_server.api_key_env
                ))
            })?
        };

        let allowed_origins = config.http_server.allowed_origins.clone();
        let authless = config.http_server.authless;
        let server = Arc::new(McpServer::new(db, config));

        Ok(Self {
            server,
            api_key,
            allowed_origins,
            authless,
        })
    }

    /// Run the HTTP server on the given port.
    pub async fn run(&self, port: u16) -> Result<()> {
        let app = self.create_router();

        let addr = format!("127.0.0.1:{}", port);
        log::info!("Starting HTTP MCP server on http://{}", addr);
        log::info!("MCP endpoint: http://{}/mcp", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            OtInvError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!(
                    "Failed to bind to {}: {}. Another process may already be using \
                     this port; set http_server.port in config.toml to change it.",
                    addr, e
                ),
            ))
        })?;

        axum::serve(listener, app).await.map_err(|e| {
            OtInvError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;

        Ok(())
    }

    fn create_router(&self) -> Router {
        // Preflight responses must agree with the per-request origin checks,
        // so configured origins feed both.
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/sse", get(handle_sse))
            .route("/mcp", post(handle_post))
            .route("/.well-known/mcp-server", get(handle_discovery))
            .route("/.well-known/mcp.json", get(handle_discovery))
            .route("/health", get(handle_health))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(AppState::new(
                Arc::clone(&self.server),
                self.api_key.clone(),
                self.allowed_origins.clone(),
                self.authless,
            ))
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    server: Arc<McpServer>,
    api_key: String,
    allowed_origins: Vec<String>,
    authless: bool,
    // Session management: map session ID to response sender
    sessions: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<JsonRpcResponse>>>>,
}

impl AppState {
    fn new(
        server: Arc<McpServer>,
        api_key: String,
        allowed_origins: Vec<String>,
        authless: bool,
    ) -> Self {
        Self {
            server,
            api_key,
            allowed_origins,
            authless,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes a session's sender from the map when its SSE stream is dropped,
/// so disconnected clients do not accumulate.
struct SessionGuard {
    sessions: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<JsonRpcResponse>>>>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.lock().unwrap().remove(&self.session_id);
    }
}

/// Handle POST requests (JSON-RPC requests).
/// Responses go out via the session's SSE channel when one exists.
async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: axum::body::Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid JSON: {}", e)})),
            )
                .into_response();
        }
    };

    if !state.authless {
        if let Err(response) = validate_auth(&headers, &state.api_key) {
            return response;
        }
        if let Err(response) = validate_origin(&headers, &state.allowed_origins) {
            return response;
        }
    }

    // HTTP requests are stateless; the initialized flag only matters for stdio.
    let mut initialized = false;
    let session_id = params.get("session_id").cloned().unwrap_or_default();

    let method = request.method.clone();
    let result = state.server.process_mcp_request(request, &mut initialized).await;

    match result {
        Ok(Some(response)) => {
            let sessions = state.sessions.lock().unwrap();
            if let Some(tx) = sessions.get(&session_id) {
                let _ = tx.send(response.clone());
            } else {
                // No SSE session: answer in the POST body instead.
                return (StatusCode::OK, Json(response)).into_response();
            }
            StatusCode::ACCEPTED.into_response()
        }
        Ok(None) => {
            if method == "notifications/initialized" {
                return StatusCode::ACCEPTED.into_response();
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            log::error!("Error processing MCP request: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal server error",
                    "details": e.to_string()
                })),
            )
                .into_response()
        }
    }
}

/// SSE endpoint. Sends the endpoint event with a fresh session id, then
/// relays responses from the POST handler interleaved with keepalives.
async fn handle_sse(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    // Validation failures must not break the stream; the POST endpoint
    // enforces auth for actual requests.
    if !state.authless {
        let _ = validate_auth(&headers, &state.api_key);
        let _ = validate_origin(&headers, &state.allowed_origins);
    }

    use tokio::time::{interval, Duration};

    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    {
        let mut sessions = state.sessions.lock().unwrap();
        sessions.insert(session_id.clone(), tx);
    }
    let guard = SessionGuard {
        sessions: Arc::clone(&state.sessions),
        session_id: session_id.clone(),
    };

    let endpoint_uri = format!("/mcp?session_id={}", session_id);
    let endpoint_event = Event::default().event("endpoint").data(endpoint_uri);

    let response_stream =
        tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(|response| {
            let response_json = serde_json::to_string(&response).unwrap_or_default();
            std::result::Result::<Event, Infallible>::Ok(
                Event::default().event("message").data(response_json),
            )
        });

    let mut interval_timer = interval(Duration::from_secs(30));
    interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let keepalive_stream = IntervalStream::new(interval_timer).map(move |_| {
        std::result::Result::<Event, Infallible>::Ok(Event::default().data(": keepalive"))
    });

    let endpoint_stream = stream::once(async move {
        std::result::Result::<Event, Infallible>::Ok(endpoint_event)
    });

    use futures_util::stream::select;
    let merged_stream = select(response_stream, keepalive_stream);
    // The guard rides along with the stream; dropping the stream cleans up.
    let combined_stream = endpoint_stream.chain(merged_stream).map(move |event| {
        let _ = &guard;
        event
    });

    let keepalive = KeepAlive::new().interval(Duration::from_secs(15)).text("ping");

    Sse::new(combined_stream).keep_alive(keepalive)
}

/// Discovery endpoint (/.well-known/mcp-server or /.well-known/mcp.json)
async fn handle_discovery(State(state): State<AppState>) -> Response {
    let mut discovery = serde_json::json!({
        "name": "otinv",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "otinv",
            "version": env!("CARGO_PKG_VERSION")
        },
        "transport": {
            "type": "sse",
            "endpoint": "/sse"
        }
    });

    if state.authless {
        discovery["authentication"] = serde_json::json!({
            "type": "none"
        });
    }

    (StatusCode::OK, Json(discovery)).into_response()
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "otinv",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

/// Validate Authorization header
fn validate_auth(headers: &HeaderMap, expected_key: &str) -> std::result::Result<(), Response> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "Missing Authorization header",
                    "message": "Use 'Authorization: Bearer <api-key>' header"
                })),
            )
                .into_response()
        })?;

    if !auth_header.starts_with("Bearer ") {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Invalid Authorization header format",
                "message": "Use 'Authorization: Bearer <api-key>' header"
            })),
        )
            .into_response());
    }

    let provided_key = &auth_header[7..];
    if provided_key != expected_key {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Invalid API key"
            })),
        )
            .into_response());
    }

    Ok(())
}

/// Validate Origin header (prevents DNS rebinding attacks)
fn validate_origin(
    headers: &HeaderMap,
    allowed_origins: &[String],
) -> std::result::Result<(), Response> {
    if allowed_origins.is_empty() {
        return Ok(());
    }

    // Absent origin means a direct request, not a browser; allow it.
    let origin = match headers.get("origin").and_then(|h| h.to_str().ok()) {
        Some(o) => o,
        None => return Ok(()),
    };

    if allowed_origins
        .iter()
        .any(|allowed| origin == allowed || origin.starts_with(&format!("{}://", allowed)))
    {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "Origin not allowed",
                "message": format!("Origin '{}' is not in the allowed origins list", origin)
            })),
        )
            .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_validate_auth() {
        let headers = header_map(&[("authorization", "Bearer secret")]);
        assert!(validate_auth(&headers, "secret").is_ok());
        assert!(validate_auth(&headers, "other").is_err());
        assert!(validate_auth(&HeaderMap::new(), "secret").is_err());

        let headers = header_map(&[("authorization", "Basic secret")]);
        assert!(validate_auth(&headers, "secret").is_err());
    }

    #[test]
    fn test_session_guard_removes_entry_on_drop() {
        let sessions: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        sessions.lock().unwrap().insert("s1".to_string(), tx);

        let guard = SessionGuard {
            sessions: Arc::clone(&sessions),
            session_id: "s1".to_string(),
        };
        assert_eq!(sessions.lock().unwrap().len(), 1);
        drop(guard);
        assert!(sessions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_validate_origin() {
        let allowed = vec!["https://claude.ai".to_string()];
        let headers = header_map(&[("origin", "https://claude.ai")]);
        assert!(validate_origin(&headers, &allowed).is_ok());

        let headers = header_map(&[("origin", "https://evil.example")]);
        assert!(validate_origin(&headers, &allowed).is_err());

        // No origin header or no configured origins passes.
        assert!(validate_origin(&HeaderMap::new(), &allowed).is_ok());
        let headers = header_map(&[("origin", "https://anything.example")]);
        assert!(validate_origin(&headers, &[]).is_ok());
    }
}
