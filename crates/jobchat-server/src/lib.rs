pub mod config;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use jobchat_api::auth::{self, AppState};
use jobchat_api::conversations;
use jobchat_api::middleware::{bearer_token, decode_token, require_auth};
use jobchat_gateway::connection;

pub use config::ServerConfig;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{other_id}/messages",
            get(conversations::get_transcript),
        )
        .route("/participants/{id}", get(conversations::get_participant))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let ws_route = Router::new().route("/gateway", get(ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    token: Option<String>,
}

/// Authenticates the handshake by bearer header or `?token=` before
/// upgrading; anything else is answered 401.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers).map(str::to_owned).or(query.token);
    let Some(claims) = token
        .as_deref()
        .and_then(|t| decode_token(&state.jwt_secret, t))
    else {
        warn!("Gateway upgrade rejected: missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let db = state.db.clone();
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, db, dispatcher, claims.sub))
}
