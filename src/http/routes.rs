//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::{RosterEntry, REQUIRED_PLAYERS};
use crate::http::middleware::require_service_token;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Provisioning is for the backend service, not game clients
    let provisioning_routes = Router::new()
        .route("/rooms", post(create_room_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_service_token,
        ));

    Router::new()
        .merge(public_routes)
        .merge(provisioning_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.sessions.active_rooms(),
        active_players: state.sessions.total_players(),
    })
}

// ============================================================================
// Room provisioning
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionedPlayer {
    identity: Uuid,
    name: String,
    #[serde(default)]
    profile_image: Option<String>,
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    players: Vec<ProvisionedPlayer>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinLink {
    identity: Uuid,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_code: String,
    ws_url: String,
    join_links: Vec<JoinLink>,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    if req.players.is_empty() || req.players.len() > REQUIRED_PLAYERS {
        return Err(AppError::BadRequest(format!(
            "A room takes 1 to {} players",
            REQUIRED_PLAYERS
        )));
    }

    let mut identities: Vec<Uuid> = req.players.iter().map(|p| p.identity).collect();
    identities.sort();
    identities.dedup();
    if identities.len() != req.players.len() {
        return Err(AppError::BadRequest(
            "Player identities must be distinct".to_string(),
        ));
    }

    let roster: Vec<RosterEntry> = req
        .players
        .iter()
        .map(|p| RosterEntry {
            identity: p.identity,
            name: p.name.clone(),
            profile_image: p.profile_image.clone(),
        })
        .collect();

    let room_code = state.sessions.create_room(roster, false);

    let client_base = state
        .config
        .client_origin
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    let join_links = req
        .players
        .iter()
        .map(|p| JoinLink {
            identity: p.identity,
            url: format!(
                "{}?gameSessionUuid={}&uuid={}",
                client_base, room_code, p.identity
            ),
        })
        .collect();

    let ws_url = format!(
        "{}/ws",
        state
            .config
            .public_base_url
            .replace("https://", "wss://")
            .replace("http://", "ws://")
    );

    Ok(Json(CreateRoomResponse {
        room_code,
        ws_url,
        join_links,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
