//! # HTTP API
//!
//! The axum router for the node's HTTP port. Voting sites post to the
//! Votifier endpoints under [`HTTP_BASE_PATH`]; operators use `/health`
//! and `/metrics`.
//!
//! ## Endpoints
//!
//! | Method | Path                                 | Description                       |
//! |--------|--------------------------------------|-----------------------------------|
//! | POST   | `/Hyvote/HytaleVotifier/vote`        | Submit a V1 or V2 vote            |
//! | GET    | `/Hyvote/HytaleVotifier/status`      | Receiver status and protocols     |
//! | GET    | `/Hyvote/HytaleVotifier/publickey`   | RSA public key, PEM               |
//! | GET    | `/Hyvote/HytaleVotifier/test`        | Fire a synthetic vote (opt-in)    |
//! | GET    | `/health`                            | Liveness probe                    |
//! | GET    | `/metrics`                           | Prometheus metrics                |
//!
//! Votifier responses are `{"status": "ok"|"error", "message": ..}`.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRef, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use votifier_protocol::config::{now_millis, HTTP_BASE_PATH, MAX_HTTP_BODY_BYTES, SERVER_TYPE};
use votifier_protocol::ingest::BodyLimit;
use votifier_protocol::{
    AcceptedVote, Dispatcher, Protocol, Transport, Vote, VoteError, VoteProcessor, VoteSource,
};

use crate::metrics::{metrics_handler, SharedMetrics};

/// Service name used by `/test` when none is given.
const TEST_SERVICE_NAME: &str = "TestService";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub processor: VoteProcessor,
    pub dispatcher: Dispatcher,
    pub metrics: SharedMetrics,
    /// Mount `GET /test`.
    pub test_endpoint: bool,
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Votifier response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<Vote>,
}

impl VoteResponse {
    fn ok(message: String) -> Self {
        Self {
            status: "ok".into(),
            message,
            vote: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: message.into(),
            vote: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    server_type: &'static str,
    protocols: ProtocolAvailability,
}

#[derive(Debug, Serialize)]
struct ProtocolAvailability {
    v1: bool,
    v2: bool,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Build the router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let mut votifier = Router::new()
        .route("/vote", post(vote_handler))
        .route("/status", get(status_handler))
        .route("/publickey", get(public_key_handler));
    if state.test_endpoint {
        votifier = votifier.route("/test", get(test_vote_handler));
    }

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest(HTTP_BASE_PATH, votifier)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

/// A running HTTP server, stopped through [`HttpServerHandle::stop`].
pub struct HttpServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Serve `router` on `listener` in a background task. Handlers see the
/// peer address through `ConnectInfo`.
pub fn spawn_server(listener: TcpListener, router: Router) -> std::io::Result<HttpServerHandle> {
    let local_addr = listener.local_addr()?;
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    Ok(HttpServerHandle {
        local_addr,
        shutdown,
        task,
    })
}

impl HttpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and give in-flight requests up to `grace` to finish.
    /// A request still open after that, such as an upload that stalled
    /// mid-body, is abandoned along with the server task.
    pub async fn stop(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let abort = self.task.abort_handle();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => tracing::info!("HTTP server stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server task ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "grace period elapsed; aborting HTTP server"
                );
                abort.abort();
            }
        }
    }
}

/// HTTP status for a rejected vote.
pub fn status_for(error: &VoteError) -> StatusCode {
    match error {
        VoteError::EmptyPayload
        | VoteError::UnknownProtocol
        | VoteError::Parse { .. }
        | VoteError::Decryption
        | VoteError::Challenge(_)
        | VoteError::InvalidFraming(_) => StatusCode::BAD_REQUEST,
        VoteError::Signature(_) => StatusCode::UNAUTHORIZED,
        VoteError::ProtocolDisabled(_) => StatusCode::FORBIDDEN,
        VoteError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        VoteError::Storage(_) | VoteError::Key(_) | VoteError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(VoteResponse::error(message))).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Liveness only.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /vote`.
async fn vote_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Body,
) -> Response {
    let remote = connect.map(|ConnectInfo(addr)| addr);

    let accepted = match read_body(body).await {
        Ok(bytes) => state
            .processor
            .process_payload(&String::from_utf8_lossy(&bytes)),
        Err(e) => Err(e),
    };

    match accepted {
        Ok(accepted) => accept(&state, accepted, remote),
        Err(e) => reject(&state, e, remote),
    }
}

/// Buffer the body frame by frame, refusing anything past the bound.
async fn read_body(mut body: Body) -> Result<Vec<u8>, VoteError> {
    let mut limit = BodyLimit::new(MAX_HTTP_BODY_BYTES);
    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| VoteError::Internal(format!("failed to read request body: {e}")))?;
        if let Ok(data) = frame.into_data() {
            limit.push(&data)?;
        }
    }
    Ok(limit.into_bytes())
}

fn accept(state: &AppState, accepted: AcceptedVote, remote: Option<SocketAddr>) -> Response {
    let source = VoteSource::new(accepted.protocol, Transport::Http, remote);
    if let Err(e) = state.dispatcher.dispatch(&accepted.vote, &source) {
        tracing::error!(
            error = %e,
            username = accepted.vote.username(),
            "vote accepted but not recorded"
        );
    }
    state.metrics.record_accepted(&accepted, Transport::Http);

    tracing::debug!(
        remote = ?remote,
        protocol = %accepted.protocol,
        service = accepted.vote.service_name(),
        username = accepted.vote.username(),
        "http vote accepted"
    );

    let message = format!("Vote processed for {}", accepted.vote.username());
    (StatusCode::OK, Json(VoteResponse::ok(message))).into_response()
}

fn reject(state: &AppState, error: VoteError, remote: Option<SocketAddr>) -> Response {
    state.metrics.record_rejected(&error);
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(remote = ?remote, error = %error, "failed to process http vote");
    } else {
        tracing::warn!(remote = ?remote, error = %error, "rejected http vote");
    }
    json_error(status, error.public_message())
}

/// `GET /status`. 503 until the key pair is loaded.
async fn status_handler(State(state): State<AppState>) -> Response {
    let keys_ready = state.processor.keys().has_keys();
    if !keys_ready {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "RSA keys not initialized");
    }

    let toggles = state.processor.toggles();
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        server_type: SERVER_TYPE,
        protocols: ProtocolAvailability {
            v1: toggles.legacy_enabled,
            v2: state.processor.modern_available(),
        },
    })
    .into_response()
}

/// `GET /publickey`. The PEM voting sites encrypt V1 votes with.
async fn public_key_handler(State(state): State<AppState>) -> Response {
    match state.processor.keys().public_key_pem() {
        Ok(pem) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-pem-file")],
            pem,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "public key requested before keys were loaded");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "RSA keys not initialized")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestVoteParams {
    username: Option<String>,
    service_name: Option<String>,
    address: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `GET /test?username=..&serviceName=..&address=..`. Dispatches a vote
/// that never went through a parser.
async fn test_vote_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<TestVoteParams>,
) -> Response {
    let remote = connect.map(|ConnectInfo(addr)| addr);

    let Some(username) = non_blank(params.username) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "Missing required parameter: username",
        );
    };
    let service_name =
        non_blank(params.service_name).unwrap_or_else(|| TEST_SERVICE_NAME.to_string());
    let address = non_blank(params.address)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_default();

    let vote = match Vote::new(service_name, username, address, now_millis()) {
        Ok(vote) => vote,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let source = VoteSource::new(Protocol::Unknown, Transport::Test, remote);
    if let Err(e) = state.dispatcher.dispatch(&vote, &source) {
        tracing::error!(error = %e, "test vote not recorded");
    }
    state.metrics.record_accepted(
        &AcceptedVote {
            vote: vote.clone(),
            protocol: Protocol::Unknown,
        },
        Transport::Test,
    );
    tracing::info!(
        service = vote.service_name(),
        username = vote.username(),
        address = vote.address(),
        "test vote fired"
    );

    let message = format!("Test vote fired for {}", vote.username());
    let body = VoteResponse {
        vote: Some(vote),
        ..VoteResponse::ok(message)
    };
    (StatusCode::OK, Json(body)).into_response()
}
