//! HTTP server setup (`serve` CLI mode).
//!
//! Grounded on `api/src/server/mod.rs`'s `ApiServer::new`/`start` shape:
//! build a `Router` over shared state, bind, and run under
//! `axum::serve`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{ask, health_check, status, ApiState};

pub struct ApiServer {
    bind_addr: SocketAddr,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(bind_addr: SocketAddr, state: Arc<ApiState>) -> Self {
        Self { bind_addr, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/status", get(status))
            .route("/ask", post(ask))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn run(&self) -> std::io::Result<()> {
        info!("praxis API server listening on {}", self.bind_addr);
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        axum::serve(listener, self.router()).await
    }
}
