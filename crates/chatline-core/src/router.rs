//! Chat message routing for Chatline.
//!
//! The router validates the sender's live subscription, classifies the
//! post's target, fans it out through the transport collaborator, and
//! appends public messages to history.

use crate::events::{Payload, ServerEvents, Subscription};
use crate::history::HistoryStore;
use crate::message::{classify_target, ChatMessage, ChatPost, MessageId, RawPost, Target};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Router errors. All are synchronous pre-fan-out checks: a failed post
/// has produced no deliveries and no history appends.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The sender's connection id has no live subscription.
    #[error("Subscription {0} does not exist")]
    SubscriptionNotFound(String),

    /// Raw control post without the required authentication.
    #[error("You must be authenticated to post raw control messages")]
    Forbidden,

    /// Malformed targeting, e.g. a broadcast post with no channel.
    #[error("{0}")]
    Validation(&'static str),
}

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Reject raw control posts from unauthenticated callers.
    pub require_auth_for_raw: bool,
}

/// The chat message router.
///
/// Holds no connection state of its own; subscriptions live in the
/// [`ServerEvents`] collaborator, logs in the [`HistoryStore`].
pub struct ChatRouter {
    events: Arc<dyn ServerEvents>,
    history: Arc<HistoryStore>,
    config: RouterConfig,
}

impl ChatRouter {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new(events: Arc<dyn ServerEvents>, history: Arc<HistoryStore>) -> Self {
        Self::with_config(events, history, RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(
        events: Arc<dyn ServerEvents>,
        history: Arc<HistoryStore>,
        config: RouterConfig,
    ) -> Self {
        Self {
            events,
            history,
            config,
        }
    }

    /// Route a chat post and return the constructed message.
    ///
    /// Broadcast posts are delivered to every live subscriber of the
    /// channel and appended to its history log. Direct posts go to the
    /// target user, then a feedback copy (body prefixed with the
    /// recipient's display name) is relayed to each of the sender's own
    /// live subscriptions; private messages are never logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender has no live subscription or the
    /// post's targeting is malformed.
    pub async fn post_chat(&self, post: ChatPost) -> Result<ChatMessage, RouterError> {
        let sub = self.resolve_sender(&post.from)?;
        let target = classify_target(post.to_user_id.as_deref(), post.channel.as_deref())
            .map_err(RouterError::Validation)?;
        let selector = post.selector.as_deref();

        match target {
            Target::Broadcast { channel } => {
                let msg = ChatMessage {
                    id: self.history.next_id(&channel),
                    channel: channel.clone(),
                    from_user_id: sub.user_id,
                    from_display_name: sub.display_name,
                    body: post.message,
                    private: false,
                };

                self.events
                    .notify_channel(&channel, selector, Payload::Chat(msg.clone()))
                    .await;
                self.history.append(&channel, msg.clone());

                debug!(channel = %channel, id = msg.id, "Routed public chat message");
                Ok(msg)
            }
            Target::Direct { user_id } => {
                let msg = ChatMessage {
                    id: self.history.next_id(post.channel.as_deref().unwrap_or_default()),
                    channel: post.channel.unwrap_or_default(),
                    from_user_id: sub.user_id.clone(),
                    from_display_name: sub.display_name,
                    body: post.message,
                    private: true,
                };

                // The recipient must get the message before any feedback
                // relay is attempted.
                self.events
                    .notify_user_id(&user_id, selector, Payload::Chat(msg.clone()))
                    .await;

                self.relay_to_sender(&sub.user_id, &user_id, &msg, selector)
                    .await;

                debug!(to_user = %user_id, id = msg.id, "Routed private chat message");
                Ok(msg)
            }
        }
    }

    /// Route a raw control post. No response payload.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when the host requires authentication for raw
    /// posts and the caller has none; otherwise the same validation
    /// errors as [`post_chat`](Self::post_chat).
    pub async fn post_raw(&self, post: RawPost, authenticated: bool) -> Result<(), RouterError> {
        if self.config.require_auth_for_raw && !authenticated {
            warn!(from = %post.from, "Rejected unauthenticated raw post");
            return Err(RouterError::Forbidden);
        }

        self.resolve_sender(&post.from)?;
        let target = classify_target(post.to_user_id.as_deref(), post.channel.as_deref())
            .map_err(RouterError::Validation)?;
        let selector = post.selector.as_deref();

        match target {
            Target::Broadcast { channel } => {
                self.events
                    .notify_channel(&channel, selector, Payload::Raw(post.message))
                    .await;
            }
            Target::Direct { user_id } => {
                self.events
                    .notify_user_id(&user_id, selector, Payload::Raw(post.message))
                    .await;
            }
        }

        Ok(())
    }

    /// Read the merged history window for a set of channels.
    #[must_use]
    pub fn get_history(
        &self,
        channels: &[String],
        after_id: Option<MessageId>,
        take: Option<usize>,
    ) -> Vec<ChatMessage> {
        self.history.query_many(channels, after_id, take)
    }

    /// Discard all channel history.
    pub fn clear_history(&self) {
        self.history.flush();
    }

    /// Drop all live connection/subscription state in the transport.
    pub fn reset_events(&self) {
        self.events.reset_all();
    }

    fn resolve_sender(&self, from: &str) -> Result<Subscription, RouterError> {
        self.events
            .find_subscription(from)
            .ok_or_else(|| RouterError::SubscriptionNotFound(from.to_string()))
    }

    /// Relay a feedback copy of a private message to each of the
    /// sender's live subscriptions, so every window the sender has open
    /// shows what was sent and to whom. Zero sender subscriptions means
    /// zero sends. Order across subscriptions is unspecified.
    async fn relay_to_sender(
        &self,
        sender_user_id: &str,
        recipient_user_id: &str,
        msg: &ChatMessage,
        selector: Option<&str>,
    ) {
        let recipient_name = self
            .events
            .find_subscriptions_by_user_id(recipient_user_id)
            .into_iter()
            .next()
            .map(|s| s.display_name)
            .unwrap_or_else(|| recipient_user_id.to_string());

        let relay = msg.relay_to(&recipient_name);

        for sender_sub in self.events.find_subscriptions_by_user_id(sender_user_id) {
            self.events
                .notify_subscription(&sender_sub.connection_id, selector, Payload::Chat(relay.clone()))
                .await;
        }
    }
}
