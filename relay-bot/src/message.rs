//! Message types for channel communication.

use serde::{Deserialize, Serialize};

/// Channel type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Discord,
    Cli,
}

impl ChannelType {
    /// Get the channel type as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Cli => "cli",
        }
    }
}

/// Where a message was posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// One-to-one conversation with the bot
    Direct,
    /// Server (guild) channel or group conversation
    Guild,
}

/// Inbound message, normalized across channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID (channel-specific)
    pub id: String,
    /// Channel type
    pub channel_type: ChannelType,
    /// Conversation to reply into (DM channel ID for Discord)
    pub channel_id: String,
    /// Author identifier, the session key
    pub user_id: String,
    /// Trimmed text content
    pub text: String,
    /// Direct or guild conversation
    pub kind: ConversationKind,
    /// Authored by the bot's own account
    #[serde(default)]
    pub from_self: bool,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace ID for log correlation
    pub trace_id: String,
}

impl ChannelMessage {
    /// Build a direct message from `user_id` with trimmed `text`.
    pub fn direct(
        channel_type: ChannelType,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        text: &str,
    ) -> Self {
        Self {
            id: relay_common::logging::generate_trace_id(),
            channel_type,
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            text: text.trim().to_string(),
            kind: ConversationKind::Direct,
            from_self: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: relay_common::logging::generate_trace_id(),
        }
    }

    /// Whether this is a one-to-one conversation with the bot.
    pub const fn is_direct(&self) -> bool {
        matches!(self.kind, ConversationKind::Direct)
    }
}

/// Outgoing message to send to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target channel type
    pub channel_type: ChannelType,
    /// Target channel ID
    pub channel_id: String,
    /// Reply to message ID (optional)
    pub reply_to: Option<String>,
    /// Text body, already within the channel's length limit
    pub text: String,
}

impl OutgoingMessage {
    /// Plain text reply into the conversation `message` came from.
    pub fn reply(message: &ChannelMessage, text: impl Into<String>) -> Self {
        Self {
            channel_type: message.channel_type,
            channel_id: message.channel_id.clone(),
            reply_to: None,
            text: text.into(),
        }
    }
}
