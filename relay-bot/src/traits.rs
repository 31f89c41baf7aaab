//! Channel traits for implementing channel adapters.

use crate::message::{ChannelMessage, OutgoingMessage};
use async_trait::async_trait;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Channel adapter trait.
///
/// A channel delivers inbound direct messages to a callback and sends
/// replies back into the originating conversation.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Longest text a single outgoing message may carry, if limited.
    fn max_message_length(&self) -> Option<usize>;

    /// Initialize the channel (connect, authenticate, etc.).
    async fn init(&mut self) -> ChannelResult<()>;

    /// Send one message. Returns the platform message ID.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Show a typing indicator in the conversation.
    async fn start_typing(&self, channel_id: &str) -> ChannelResult<()>;

    /// Listen for incoming messages until the channel closes or shuts down.
    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static;

    /// Check if the channel is healthy.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Shutdown the channel gracefully.
    async fn shutdown(&self) -> ChannelResult<()>;
}
