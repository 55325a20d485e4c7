//! The HTTP/WebSocket surface (§6): thin axum handlers over the session
//! registry and buffer hub. Routing and request/response shapes live here;
//! the registry and hub own all the actual state.

pub mod routes;
pub mod ws;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;

use crate::auth::TokenVerifier;
use crate::session::registry::SessionRegistry;

/// State shared across every HTTP and WebSocket handler.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<dyn TokenVerifier>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .merge(ws::ws_routes())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind_address: IpAddr, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::new(bind_address, port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
