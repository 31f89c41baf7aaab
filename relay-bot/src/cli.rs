//! Console channel for local runs.
//!
//! Every stdin line is a direct message from the single user `console`;
//! replies go to stdout. Useful for exercising commands and the inference
//! backend without a Discord bot.

use crate::message::{ChannelMessage, ChannelType, OutgoingMessage};
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

/// User and conversation ID for console messages.
pub const CONSOLE_USER: &str = "console";

/// Stdin/stdout channel with a single user.
pub struct CliChannel {
    shutdown_tx: watch::Sender<bool>,
}

impl CliChannel {
    /// Create a new console channel.
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx }
    }

    /// Turn one input line into a message; blank lines and `/quit` yield `None`.
    fn message_from_line(line: &str) -> Option<ChannelMessage> {
        let line = line.trim();
        if line.is_empty() || line == "/quit" || line == "/exit" {
            return None;
        }
        Some(ChannelMessage::direct(
            ChannelType::Cli,
            CONSOLE_USER,
            CONSOLE_USER,
            line,
        ))
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &'static str {
        "cli"
    }

    fn max_message_length(&self) -> Option<usize> {
        None
    }

    async fn init(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let write_failed = |e: io::Error| ChannelError::SendFailed(format!("stdout write failed: {e}"));
        let mut stdout = io::stdout();
        stdout
            .write_all(format!("{}\n", message.text).as_bytes())
            .await
            .map_err(write_failed)?;
        stdout.flush().await.map_err(write_failed)?;
        Ok(relay_common::logging::generate_trace_id())
    }

    async fn start_typing(&self, _channel_id: &str) -> ChannelResult<()> {
        Ok(())
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        let mut lines = BufReader::new(io::stdin()).lines();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => return Err(ChannelError::Connection(format!("stdin read failed: {e}"))),
                    };
                    let trimmed = line.trim();
                    if trimmed == "/quit" || trimmed == "/exit" {
                        break;
                    }
                    if let Some(message) = Self::message_from_line(trimmed) {
                        callback(message);
                    }
                }
            }
        }

        tracing::info!("Console input closed");
        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}
