use std::sync::Arc;

use anyhow::Result;

use vtd::auth::StaticTokenVerifier;
use vtd::broadcast::hub::BufferHub;
use vtd::http::{self, AppState};
use vtd::session::registry::SessionRegistry;
use vtd::session::store::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vtd=info".parse()?),
        )
        .init();

    let config = vtd::config::Config::from_env()?;
    std::fs::create_dir_all(&config.control_dir)?;

    let token = std::env::var("VIBETUNNEL_TOKEN").unwrap_or_else(|_| generate_token());
    tracing::info!(token = %token, "bearer token for this run (set VIBETUNNEL_TOKEN to pin it)");

    let store = SessionStore::new(config.control_dir.clone());
    let hub = Arc::new(BufferHub::new());
    let registry = Arc::new(SessionRegistry::new(store, hub));

    match registry.reap_orphans_at_startup() {
        Ok(reaped) if !reaped.is_empty() => {
            tracing::info!(count = reaped.len(), "reaped orphaned session directories");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "failed to reap orphaned sessions at startup"),
    }

    let state = Arc::new(AppState {
        registry,
        auth: Arc::new(StaticTokenVerifier::new(token)),
    });

    http::serve(config.bind_address, config.port, state).await
}

/// Grounded on `daemon/server.rs`'s `generate_token`: a random URL-safe
/// token used when no explicit token is configured.
fn generate_token() -> String {
    use base64::Engine;
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
