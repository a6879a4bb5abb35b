//! HTTP control surface for the supervisor.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::Supervisor;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

/// Build the router with all control-surface routes.
pub fn create_router(supervisor: Arc<Supervisor>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/servers", post(handlers::start_server))
        .route("/servers", get(handlers::list_servers))
        .route("/servers", delete(handlers::stop_all_servers))
        .route("/servers/{id}", delete(handlers::stop_server))
        .route("/servers/{id}/tools", get(handlers::list_tools))
        .route("/servers/{id}/tools/{tool}/call", post(handlers::call_tool))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { supervisor })
}

/// Serve the control surface until SIGINT/SIGTERM, then stop every managed
/// server before returning.
pub async fn serve(port: u16, supervisor: Arc<Supervisor>) -> Result<()> {
    let app = create_router(supervisor.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("mcpd listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, stopping all servers");
    supervisor.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
