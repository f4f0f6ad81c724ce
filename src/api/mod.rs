//! HTTP and WebSocket surface
//!
//! One WebSocket route carries a client's whole conversation: text input in,
//! captions, audio payloads and turn signals out.

pub mod health;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::conversation::ConversationContext;
use crate::Result;

/// Shared state for API handlers
pub struct ApiState {
    /// Collaborators cloned into every turn
    pub context: ConversationContext,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(context: ConversationContext, host: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { context }),
            host: host.into(),
            port,
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .merge(websocket::router())
            .merge(health::router())
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to start
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            addr = %addr,
            backend = self.state.context.backend.name(),
            "API server listening"
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
