//! Chat-gateway abstraction: events in, delivery operations out.
//!
//! The handler depends only on the [`ChatGateway`] trait; the shipped
//! transport is [`ws::WsGateway`]. Tests substitute recording fakes.

pub mod ws;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable author identifier, the key for all per-author moderation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub String);

impl AuthorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier, used only for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a channel is a private direct channel or a shared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Direct,
    Shared,
}

/// One message-received event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: MessageId,
    pub channel: ChannelId,
    pub channel_kind: ChannelKind,
    pub author: AuthorId,
    /// Display name used in public warnings and logs.
    pub author_name: String,
    /// Set on messages the bot itself sent; the handler drops these.
    pub author_is_bot: bool,
    pub content: String,
}

/// Inbound gateway events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Connection established and identified.
    Ready { identity: String },
    /// A message arrived in a channel the bot can see.
    Message(MessageEvent),
    /// An application-command invocation.
    Command { name: String, channel: ChannelId },
}

/// Failures from gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway acknowledged the operation negatively (for direct
    /// messages typically because the recipient disallows them).
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// The websocket transport is gone; a reconnect is in progress.
    #[error("gateway transport closed")]
    TransportClosed,

    /// The gateway violated the envelope protocol.
    #[error("gateway protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Operations the bot needs from the chat platform.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Remove a message from its channel.
    async fn delete_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<(), GatewayError>;

    /// Send a text reply into a channel.
    async fn send_message(&self, channel: &ChannelId, text: &str) -> Result<(), GatewayError>;

    /// Send a private message to an author.
    ///
    /// Fails with [`GatewayError::Rejected`] when the recipient disallows
    /// direct messages.
    async fn send_direct(&self, author: &AuthorId, text: &str) -> Result<(), GatewayError>;

    /// Register an application command. Done once at startup.
    async fn register_command(&self, name: &str, description: &str) -> Result<(), GatewayError>;

    /// Round-trip latency to the gateway, if a heartbeat has measured one.
    async fn latency_ms(&self) -> Option<u64>;
}
