//! Chat message and post types for Chatline.
//!
//! `ChatMessage` is the unit the router fans out and the history store logs.
//! Posts are the inbound requests; `Target` is their classified destination.

use serde::{Deserialize, Serialize};

/// A unique message identifier, strictly increasing within a channel.
pub type MessageId = i64;

/// A chat message, either freshly posted or read back from history.
///
/// Serialized camelCase to match the wire field names clients expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Identifier assigned by the history store, never by the caller.
    pub id: MessageId,
    /// Channel the message belongs to.
    pub channel: String,
    /// Sender's user id, resolved from their live subscription.
    pub from_user_id: String,
    /// Sender's display name, resolved from their live subscription.
    pub from_display_name: String,
    /// Message text. Escaping/templating happens before the router sees it.
    pub body: String,
    /// True iff the message was targeted at a specific user.
    /// Private messages are never appended to history.
    #[serde(default)]
    pub private: bool,
}

impl ChatMessage {
    /// Build the sender-side feedback copy of a private message,
    /// with the body rewritten to `"@{recipient}: {body}"`.
    #[must_use]
    pub fn relay_to(&self, recipient_display_name: &str) -> Self {
        let mut copy = self.clone();
        copy.body = format!("@{}: {}", recipient_display_name, self.body);
        copy
    }
}

/// Where a post is headed, decided once at request entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every live subscriber of the channel.
    Broadcast { channel: String },
    /// A single user (all of that user's live connections).
    Direct { user_id: String },
}

/// Classify a post's destination from its optional fields.
///
/// # Errors
///
/// Returns an error message if the post is a broadcast with no channel.
pub fn classify_target(
    to_user_id: Option<&str>,
    channel: Option<&str>,
) -> Result<Target, &'static str> {
    if let Some(user_id) = to_user_id.filter(|u| !u.is_empty()) {
        return Ok(Target::Direct {
            user_id: user_id.to_string(),
        });
    }
    match channel.filter(|c| !c.is_empty()) {
        Some(channel) => Ok(Target::Broadcast {
            channel: channel.to_string(),
        }),
        None => Err("Broadcast post requires a channel"),
    }
}

/// A chat post request. Responds with the constructed [`ChatMessage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPost {
    /// Connection id of the posting subscription.
    pub from: String,
    /// Set for private messages to a specific user.
    pub to_user_id: Option<String>,
    /// Channel to broadcast to.
    pub channel: Option<String>,
    /// Message text.
    pub message: String,
    /// Opaque routing tag, forwarded unchanged to the transport.
    pub selector: Option<String>,
}

/// A raw control post request. No response payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    /// Connection id of the posting subscription.
    pub from: String,
    /// Set to target a specific user instead of the channel.
    pub to_user_id: Option<String>,
    /// Channel to broadcast to.
    pub channel: Option<String>,
    /// Raw payload delivered as-is.
    pub message: String,
    /// Opaque routing tag, forwarded unchanged to the transport.
    pub selector: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_direct_wins_over_channel() {
        let target = classify_target(Some("user-1"), Some("general")).unwrap();
        assert_eq!(
            target,
            Target::Direct {
                user_id: "user-1".to_string()
            }
        );
    }

    #[test]
    fn test_classify_broadcast() {
        let target = classify_target(None, Some("general")).unwrap();
        assert_eq!(
            target,
            Target::Broadcast {
                channel: "general".to_string()
            }
        );
    }

    #[test]
    fn test_classify_rejects_broadcast_without_channel() {
        assert!(classify_target(None, None).is_err());
        assert!(classify_target(None, Some("")).is_err());
        assert!(classify_target(Some(""), None).is_err());
    }

    #[test]
    fn test_relay_copy_rewrites_body() {
        let msg = ChatMessage {
            id: 7,
            channel: "general".to_string(),
            from_user_id: "u1".to_string(),
            from_display_name: "Alice".to_string(),
            body: "hello".to_string(),
            private: true,
        };

        let relay = msg.relay_to("Bob");
        assert_eq!(relay.body, "@Bob: hello");
        assert_eq!(relay.id, msg.id);
        // Original is untouched
        assert_eq!(msg.body, "hello");
    }

    #[test]
    fn test_chat_message_camel_case_fields() {
        let msg = ChatMessage {
            id: 1,
            channel: "general".to_string(),
            from_user_id: "u1".to_string(),
            from_display_name: "Alice".to_string(),
            body: "hi".to_string(),
            private: false,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("fromUserId").is_some());
        assert!(json.get("fromDisplayName").is_some());
        assert!(json.get("private").is_some());
    }
}
