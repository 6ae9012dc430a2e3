use crate::cache::RefreshCache;
use crate::upstream::UpstreamError;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared state for the status API
pub struct StatusAppState {
    pub cache: RefreshCache,
}

/// Create status API router
pub fn create_status_router(state: Arc<StatusAppState>) -> Router {
    Router::new()
        .route("/lab", get(get_lab_status))
        .route("/door", get(get_door_status))
        .route("/favicon.ico", get(not_found))
        .fallback(not_found)
        .with_state(state)
}

/// GET /lab - Current lab state, served from the refresh cache
async fn get_lab_status(
    State(state): State<Arc<StatusAppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, StatusError> {
    let client = client_addr(peer.map(|ConnectInfo(addr)| addr), &headers);
    info!(client = %client, "Got /lab request");

    let status = state.cache.get(Utc::now()).await?;
    debug!(?status, "Returning lab status");

    Ok((
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(status),
    )
        .into_response())
}

/// GET /door - Not implemented yet
async fn get_door_status() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found")
}

/// Address to log for a request.
///
/// Behind a local reverse proxy the peer is loopback, so the forwarded
/// address is the interesting one.
fn client_addr(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    match (peer, forwarded) {
        (Some(addr), Some(forwarded)) if addr.ip().is_loopback() => forwarded.to_string(),
        (Some(addr), _) => addr.to_string(),
        (None, Some(forwarded)) => forwarded.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Status API error: every upstream failure is an opaque 500 to clients
#[derive(Debug)]
struct StatusError(UpstreamError);

impl From<UpstreamError> for StatusError {
    fn from(e: UpstreamError) -> Self {
        Self(e)
    }
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        error!(error = %self.0, kind = self.0.kind(), "Failed to get lab status");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}
