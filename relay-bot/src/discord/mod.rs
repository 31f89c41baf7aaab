//! Discord channel.
//!
//! Receives direct messages over the Gateway WebSocket and replies through
//! the REST API. The gateway connection is re-established with capped
//! exponential backoff whenever it drops or Discord asks for a reconnect.

pub mod gateway;

use crate::message::{ChannelMessage, OutgoingMessage};
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gateway::{GatewayEvent, User};
use relay_common::DiscordConfig;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::format::DISCORD_MAX_MESSAGE_LENGTH;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Longest rate-limit wait honored before giving up on a send.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// How a gateway session ended without a hard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect,
}

#[derive(Deserialize)]
struct GatewayBot {
    url: String,
}

#[derive(Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Discord channel using Gateway WebSocket for inbound and REST for outbound.
pub struct DiscordChannel {
    bot_token: String,
    api_base: String,
    client: Client,
    bot_user_id: Arc<RwLock<Option<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl DiscordChannel {
    /// Create a new Discord channel against `api_base` (e.g. `https://discord.com/api/v10`).
    pub fn new(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            bot_user_id: Arc::new(RwLock::new(None)),
            shutdown_tx,
        }
    }

    /// Create the channel from configuration.
    pub fn from_config(config: &DiscordConfig) -> ChannelResult<Self> {
        let token = config
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::Auth("Discord bot token is not configured".into()))?;
        Ok(Self::new(token, config.api_base.as_str()))
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn fetch_current_user(&self) -> ChannelResult<User> {
        let resp = self
            .client
            .get(self.url("/users/@me"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to reach Discord: {e}")))?;

        match resp.status() {
            s if s.is_success() => resp
                .json::<User>()
                .await
                .map_err(|e| ChannelError::Internal(format!("Invalid user response: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ChannelError::Auth("Invalid Discord bot token".into()))
            }
            s => Err(ChannelError::Connection(format!(
                "Discord API error ({s}) on /users/@me"
            ))),
        }
    }

    async fn gateway_url(&self) -> ChannelResult<String> {
        let resp = self
            .client
            .get(self.url("/gateway/bot"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to get gateway: {e}")))?;

        match resp.status() {
            s if s.is_success() => match resp.json::<GatewayBot>().await {
                Ok(gw) => Ok(gw.url),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid gateway response, using default URL");
                    Ok(DEFAULT_GATEWAY_URL.to_string())
                }
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ChannelError::Auth("Invalid Discord bot token".into()))
            }
            s => Err(ChannelError::Connection(format!(
                "Discord API error ({s}) on /gateway/bot"
            ))),
        }
    }

    /// One gateway connection: hello, identify, then events until it ends.
    async fn run_session<F>(
        &self,
        callback: &F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ChannelResult<SessionEnd>
    where
        F: Fn(ChannelMessage) + Send + Sync,
    {
        let ws_url = gateway::websocket_url(&self.gateway_url().await?);
        tracing::info!(url = %ws_url, "Discord: connecting to gateway");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| ChannelError::Connection(format!("WebSocket connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let mut seq: Option<u64> = None;
        let heartbeat_ms = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match gateway::parse_frame(&text) {
                    Ok(frame) => {
                        if let GatewayEvent::Hello(hello) = frame.event {
                            break hello.heartbeat_interval;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Discord: invalid hello, using default interval");
                        break gateway::DEFAULT_HEARTBEAT_INTERVAL_MS;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ChannelError::Connection("No hello from gateway".into()));
                }
                Some(Err(e)) => {
                    return Err(ChannelError::Connection(format!("WebSocket error: {e}")));
                }
                Some(Ok(_)) => {}
            }
        };

        write
            .send(Message::Text(gateway::identify_payload(&self.bot_token)))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to identify: {e}")))?;
        tracing::info!(heartbeat_ms, "Discord: identified");

        let period = Duration::from_millis(heartbeat_ms.max(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        tracing::warn!("Discord: heartbeat not acknowledged, reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    }
                    write
                        .send(Message::Text(gateway::heartbeat_payload(seq)))
                        .await
                        .map_err(|e| ChannelError::Connection(format!("Heartbeat failed: {e}")))?;
                    awaiting_ack = true;
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            if code.is_some_and(is_fatal_close_code) {
                                return Err(ChannelError::Auth(format!(
                                    "Gateway closed the connection: {}",
                                    frame.map(|f| f.reason.into_owned()).unwrap_or_default()
                                )));
                            }
                            tracing::info!(code = ?code, "Discord: gateway closed the connection");
                            return Ok(SessionEnd::Reconnect);
                        }
                        None => return Ok(SessionEnd::Reconnect),
                        Some(Err(e)) => {
                            return Err(ChannelError::Connection(format!("WebSocket error: {e}")));
                        }
                        Some(Ok(_)) => continue,
                    };

                    let frame = match gateway::parse_frame(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::debug!(error = %e, "Discord: skipping undecodable frame");
                            continue;
                        }
                    };
                    if frame.seq.is_some() {
                        seq = frame.seq;
                    }

                    match frame.event {
                        GatewayEvent::HeartbeatRequest => {
                            write
                                .send(Message::Text(gateway::heartbeat_payload(seq)))
                                .await
                                .map_err(|e| ChannelError::Connection(format!("Heartbeat failed: {e}")))?;
                        }
                        GatewayEvent::HeartbeatAck => awaiting_ack = false,
                        GatewayEvent::Reconnect => {
                            tracing::info!("Discord: gateway requested reconnect");
                            return Ok(SessionEnd::Reconnect);
                        }
                        GatewayEvent::InvalidSession { resumable } => {
                            tracing::warn!(resumable, "Discord: invalid session");
                            return Ok(SessionEnd::Reconnect);
                        }
                        GatewayEvent::Ready(ready) => {
                            tracing::info!(
                                bot_user_id = %ready.user.id,
                                username = %ready.user.username,
                                "Discord: ready"
                            );
                            *self.bot_user_id.write().await = Some(ready.user.id);
                        }
                        GatewayEvent::MessageCreate(create) => {
                            let bot_id = self.bot_user_id.read().await.clone();
                            callback(create.into_channel_message(bot_id.as_deref()));
                        }
                        GatewayEvent::Hello(_) | GatewayEvent::Dispatch(_) | GatewayEvent::Unknown(_) => {}
                    }
                }
            }
        }
    }

    async fn rate_limit_wait(resp: reqwest::Response) -> Duration {
        let header_secs = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let body_secs = resp
            .json::<RateLimitBody>()
            .await
            .ok()
            .map(|b| b.retry_after);

        let secs = body_secs.or(header_secs).unwrap_or(1.0);
        Duration::from_secs_f64(secs.clamp(0.0, MAX_RATE_LIMIT_WAIT.as_secs_f64()))
    }
}

/// Close codes after which reconnecting cannot succeed.
fn is_fatal_close_code(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

/// Delay before reconnect attempt `attempt` (0-based), doubling up to a cap.
fn reconnect_delay(attempt: u32) -> Duration {
    INITIAL_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(MAX_BACKOFF)
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn max_message_length(&self) -> Option<usize> {
        Some(DISCORD_MAX_MESSAGE_LENGTH)
    }

    async fn init(&mut self) -> ChannelResult<()> {
        let user = self.fetch_current_user().await?;
        tracing::info!(
            bot_user_id = %user.id,
            username = %user.username,
            "Discord channel initialized"
        );
        *self.bot_user_id.write().await = Some(user.id);
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let url = self.url(&format!("/channels/{}/messages", message.channel_id));
        let mut body = json!({ "content": message.text });
        if let Some(ref reply_to) = message.reply_to {
            body["message_reference"] = json!({ "message_id": reply_to });
        }

        let mut retried = false;
        loop {
            let resp = self
                .client
                .post(&url)
                .header("Authorization", self.auth_header())
                .json(&body)
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed(format!("Discord send error: {e}")))?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = Self::rate_limit_wait(resp).await;
                if retried {
                    return Err(ChannelError::RateLimited {
                        retry_after_secs: wait.as_secs_f64().ceil() as u64,
                    });
                }
                tracing::warn!(
                    chat_id = %message.channel_id,
                    wait_ms = wait.as_millis() as u64,
                    "Discord: rate limited, retrying send"
                );
                tokio::time::sleep(wait).await;
                retried = true;
                continue;
            }

            if !status.is_success() {
                let error = resp.text().await.unwrap_or_default();
                return Err(ChannelError::SendFailed(format!(
                    "Discord API error ({status}): {error}"
                )));
            }

            let created: CreatedMessage = resp
                .json()
                .await
                .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;
            return Ok(created.id);
        }
    }

    async fn start_typing(&self, channel_id: &str) -> ChannelResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/channels/{channel_id}/typing")))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("Discord typing error: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::SendFailed(format!(
                "Discord API error ({}) on typing indicator",
                resp.status()
            )))
        }
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            match self.run_session(&callback, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Reconnect) => attempt = 0,
                Err(ChannelError::Auth(e)) => {
                    tracing::error!(error = %e, "Discord: authentication rejected, giving up");
                    return Err(ChannelError::Auth(e));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Discord: gateway session failed");
                    attempt = attempt.saturating_add(1);
                }
            }

            let delay = reconnect_delay(attempt);
            tracing::info!(delay_ms = delay.as_millis() as u64, "Discord: reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Discord: gateway listener stopped");
        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        self.fetch_current_user().await.map(|_| ())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        self.shutdown_tx.send_replace(true);
        tracing::info!("Discord channel shutdown");
        Ok(())
    }
}
