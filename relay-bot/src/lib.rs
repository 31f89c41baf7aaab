//! Relay Bot - Discord direct-message relay to a remote LLM chat API.
//!
//! Each Discord user who DMs the bot gets a private conversation with a
//! remote model: the bot keeps that user's history and selected model,
//! forwards every message together with the full history, and posts the
//! reply back into the DM.
//!
//! ## Architecture
//!
//! ```text
//! Discord gateway → mpsc queue → RelayService ─┬─ command → SessionStore
//!                                              └─ relay   → InferenceBackend
//!                                                    ↓
//! User ←── chunked send ←── Channel ←─────────── reply
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod discord;
pub mod format;
pub mod inference;
pub mod message;
pub mod relay;
pub mod session;
pub mod traits;

// Re-export commonly used types
pub use catalog::{ModelCatalog, ModelPolicy};
pub use cli::CliChannel;
pub use commands::{Command, CommandDispatcher};
pub use discord::DiscordChannel;
pub use inference::{HttpInferenceClient, InferenceBackend, InferenceError, InferenceResult};
pub use message::{ChannelMessage, ChannelType, ConversationKind, OutgoingMessage};
pub use relay::{HandleOutcome, IgnoreReason, RelayService};
pub use session::{Role, Session, SessionStore, Turn};
pub use traits::{Channel, ChannelError, ChannelResult};

use anyhow::Context;
use relay_common::Config;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Run the relay on `channel` until it closes or Ctrl-C is received.
///
/// In-flight messages are completed before this returns.
pub async fn run<C>(mut channel: C, config: &Config) -> anyhow::Result<()>
where
    C: Channel + 'static,
{
    let policy = ModelPolicy::from_config(&config.inference).context("Invalid model catalog")?;
    let store = Arc::new(SessionStore::new(config.inference.default_model()));
    let backend: Arc<dyn InferenceBackend> =
        Arc::new(HttpInferenceClient::from_config(&config.inference));

    channel
        .init()
        .await
        .with_context(|| format!("Failed to initialize {} channel", channel.name()))?;
    let channel = Arc::new(channel);

    tracing::info!(
        channel = channel.name(),
        provider = %config.inference.provider,
        endpoint = %config.inference.endpoint(),
        default_model = %config.inference.default_model(),
        validate_models = config.inference.validate_models(),
        "Starting DM relay"
    );

    let service = Arc::new(RelayService::new(channel.clone(), store, policy, backend));
    let (tx, rx) = mpsc::unbounded_channel::<ChannelMessage>();
    let processor = RelayService::spawn_processor(service, rx);

    let mut listener = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .listen(move |message| {
                    if let Err(e) = tx.send(message) {
                        tracing::error!(
                            user_id = %e.0.user_id,
                            "Relay processor stopped, message not handled"
                        );
                    }
                })
                .await
        })
    };

    let listened = tokio::select! {
        joined = &mut listener => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(error = %e, "Channel shutdown failed");
            }
            listener.await
        }
    };

    // The listener owned the queue sender; the processor now drains and exits.
    processor.await.context("Relay processor panicked")?;
    tracing::info!("DM relay stopped");

    listened
        .context("Channel listener panicked")?
        .with_context(|| format!("{} channel failed", channel.name()))
}
