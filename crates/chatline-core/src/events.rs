//! Transport collaborator seam for Chatline.
//!
//! The router does not hold connection state itself; it reads live
//! subscriptions from, and fans messages out through, a [`ServerEvents`]
//! implementation owned by the host (SSE, WebSocket, whatever delivers).

use crate::message::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A live client subscription, read-only to the router.
///
/// Lifecycle (creation, expiry) is owned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Connection/subscription id, unique per live connection.
    pub connection_id: String,
    /// User the connection belongs to. One user may hold several
    /// connections at once.
    pub user_id: String,
    /// Display name shown to other users.
    pub display_name: String,
}

/// What gets delivered to a connection.
///
/// Serialized untagged: raw strings go out as-is, chat messages and
/// objects as their JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Raw control payload, delivered verbatim.
    Raw(String),
    /// A routed chat message.
    Chat(ChatMessage),
    /// An arbitrary JSON object (object-post endpoint).
    Json(serde_json::Value),
}

impl From<ChatMessage> for Payload {
    fn from(msg: ChatMessage) -> Self {
        Self::Chat(msg)
    }
}

impl From<String> for Payload {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<&str> for Payload {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}

/// The transport collaborator the router consumes.
///
/// Notify calls fire delivery to the live connections matching the
/// target; `selector` is an opaque routing tag forwarded unchanged.
/// Delivery to connections that died mid-send is the implementation's
/// problem, not the router's.
#[async_trait]
pub trait ServerEvents: Send + Sync {
    /// Look up a subscription by connection id.
    fn find_subscription(&self, connection_id: &str) -> Option<Subscription>;

    /// All live subscriptions for a user id, possibly empty.
    fn find_subscriptions_by_user_id(&self, user_id: &str) -> Vec<Subscription>;

    /// Deliver to every live subscriber of a channel.
    async fn notify_channel(&self, channel: &str, selector: Option<&str>, payload: Payload);

    /// Deliver to every live connection of a user.
    async fn notify_user_id(&self, user_id: &str, selector: Option<&str>, payload: Payload);

    /// Deliver to a single connection.
    async fn notify_subscription(&self, connection_id: &str, selector: Option<&str>, payload: Payload);

    /// Drop all live connection/subscription state.
    fn reset_all(&self);
}
