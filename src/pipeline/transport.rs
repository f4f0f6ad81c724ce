//! Outbound message sink to a connected client

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Delivers serialized messages to a client
///
/// Failures propagate to the caller; retrying is the transport's business.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one serialized message
    ///
    /// # Errors
    ///
    /// Returns error if the client can no longer be reached
    async fn send(&self, message: String) -> Result<()>;
}

/// Transport backed by a channel drained by a socket writer task
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<String>,
}

impl ChannelTransport {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Transport("client disconnected".to_string()))
    }
}
