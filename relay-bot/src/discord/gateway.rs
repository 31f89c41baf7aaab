//! Discord gateway payloads.
//!
//! Only the subset the relay needs: hello, identify, heartbeat, READY,
//! MESSAGE_CREATE and the reconnect / invalid-session requests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::message::{ChannelMessage, ChannelType, ConversationKind};

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

/// `DIRECT_MESSAGES`
pub const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
/// `MESSAGE_CONTENT` (privileged)
pub const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;
pub const INTENTS: u64 = INTENT_DIRECT_MESSAGES | INTENT_MESSAGE_CONTENT;

/// Fallback when the hello payload carries no interval.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// Raw gateway frame.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub user: User,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: User,
    #[serde(default)]
    pub content: String,
}

impl MessageCreate {
    /// Normalize into a channel message; `bot_user_id` marks self-authored ones.
    pub fn into_channel_message(self, bot_user_id: Option<&str>) -> ChannelMessage {
        let from_self = bot_user_id.is_some_and(|id| id == self.author.id);
        let kind = if self.guild_id.is_some() {
            ConversationKind::Guild
        } else {
            ConversationKind::Direct
        };

        let mut message = ChannelMessage::direct(
            ChannelType::Discord,
            self.channel_id,
            self.author.id,
            &self.content,
        );
        message.id = self.id;
        message.kind = kind;
        message.from_self = from_self;
        message
    }
}

/// A decoded gateway frame.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Hello(Hello),
    HeartbeatRequest,
    HeartbeatAck,
    Reconnect,
    InvalidSession { resumable: bool },
    Ready(Ready),
    MessageCreate(MessageCreate),
    /// Any other dispatch; carries the event name.
    Dispatch(String),
    Unknown(u8),
}

/// Decoded event plus the sequence number to echo in heartbeats.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: Option<u64>,
    pub event: GatewayEvent,
}

/// Parse one text frame from the gateway.
pub fn parse_frame(text: &str) -> serde_json::Result<Frame> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    let seq = payload.s;

    let event = match payload.op {
        OP_HELLO => GatewayEvent::Hello(serde_json::from_value(payload.d)?),
        OP_HEARTBEAT => GatewayEvent::HeartbeatRequest,
        OP_HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
        OP_RECONNECT => GatewayEvent::Reconnect,
        OP_INVALID_SESSION => GatewayEvent::InvalidSession {
            resumable: payload.d.as_bool().unwrap_or(false),
        },
        OP_DISPATCH => match payload.t.as_deref() {
            Some("READY") => GatewayEvent::Ready(serde_json::from_value(payload.d)?),
            Some("MESSAGE_CREATE") => {
                GatewayEvent::MessageCreate(serde_json::from_value(payload.d)?)
            }
            other => GatewayEvent::Dispatch(other.unwrap_or_default().to_string()),
        },
        other => GatewayEvent::Unknown(other),
    };

    Ok(Frame { seq, event })
}

#[derive(Serialize)]
struct OutboundFrame<T: Serialize> {
    op: u8,
    d: T,
}

/// Identify (op 2) for a bot token.
pub fn identify_payload(token: &str) -> String {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "dm-relay",
                "device": "dm-relay"
            }
        }
    })
    .to_string()
}

/// Heartbeat (op 1) echoing the last sequence number.
pub fn heartbeat_payload(seq: Option<u64>) -> String {
    serde_json::to_string(&OutboundFrame {
        op: OP_HEARTBEAT,
        d: seq,
    })
    .unwrap_or_else(|_| r#"{"op":1,"d":null}"#.to_string())
}

/// Gateway websocket URL from the `/gateway/bot` base.
pub fn websocket_url(base: &str) -> String {
    format!("{}/?v=10&encoding=json", base.trim_end_matches('/'))
}
