//! HTTP surface: WebSocket upgrade, health check and optional static assets.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Request, State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::session::handle_socket;

const BANNER: &str = "Doodlewire Relay Server - Connect via WebSocket at / or /ws";

/// State shared by every request handler.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.outbound_buffer)),
            static_dir: config.static_dir.clone(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health));

    if let Some(dir) = &state.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let addr = config.addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!("Doodlewire relay server listening on {}", addr);
    if let Some(dir) = &config.static_dir {
        info!("Serving client assets from {}", dir.display());
    }

    let state = Arc::new(AppState::new(&config));
    run(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn run<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Browsers open the socket on the page origin, so `/` upgrades when asked
/// and otherwise serves the client page.
async fn index(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    if let Ok(ws) = WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        let hub = state.hub.clone();
        return ws.on_upgrade(move |socket| handle_socket(socket, hub));
    }

    match &state.static_dir {
        Some(dir) => match tokio::fs::read_to_string(dir.join("index.html")).await {
            Ok(page) => Html(page).into_response(),
            Err(e) => {
                warn!("Cannot read index.html from {}: {}", dir.display(), e);
                (StatusCode::NOT_FOUND, "index.html not found").into_response()
            }
        },
        None => BANNER.into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "users": state.hub.user_count(),
        "strokes": state.hub.stroke_count(),
    }))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
