//! In-memory server-events hub.
//!
//! `ServerEventsHub` is the live-connection registry behind the SSE
//! endpoint and the [`ServerEvents`] implementation the router fans out
//! through. Each connection gets an unbounded mpsc queue; the SSE
//! handler drains it into the response stream.

use async_trait::async_trait;
use chatline_core::{Payload, ServerEvents, Subscription};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A payload queued for one connection, tagged with its selector.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Opaque routing tag; becomes the SSE event name when set.
    pub selector: Option<String>,
    /// The payload to deliver.
    pub payload: Payload,
}

struct ConnectionEntry {
    subscription: Subscription,
    channels: HashSet<String>,
    sender: mpsc::UnboundedSender<Envelope>,
}

/// Registry of live SSE connections with channel/user/connection fan-out.
#[derive(Default)]
pub struct ServerEventsHub {
    connections: DashMap<String, ConnectionEntry>,
    next_conn: AtomicU64,
}

impl ServerEventsHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection subscribed to the given channels.
    ///
    /// Returns the subscription and the receiving end of its queue. A
    /// `cmd.onConnect` envelope carrying the subscription is queued
    /// first, so the client learns its connection id.
    pub fn connect(
        &self,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        channels: Vec<String>,
    ) -> (Subscription, mpsc::UnboundedReceiver<Envelope>) {
        let n = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            connection_id: format!("sse-{n}"),
            user_id: user_id.into(),
            display_name: display_name.into(),
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Envelope {
            selector: Some("cmd.onConnect".to_string()),
            payload: Payload::Json(json!(subscription)),
        });

        debug!(
            connection = %subscription.connection_id,
            user = %subscription.user_id,
            channels = ?channels,
            "Connection registered"
        );

        self.connections.insert(
            subscription.connection_id.clone(),
            ConnectionEntry {
                subscription: subscription.clone(),
                channels: channels.into_iter().collect(),
                sender,
            },
        );

        (subscription, receiver)
    }

    /// Remove a connection from the registry.
    pub fn disconnect(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            debug!(connection = %connection_id, "Connection removed");
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver to every connection matching the filter, pruning any
    /// whose receiver has gone away.
    fn deliver_where<F>(&self, filter: F, selector: Option<&str>, payload: &Payload) -> usize
    where
        F: Fn(&ConnectionEntry) -> bool,
    {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.connections.iter() {
            if !filter(entry.value()) {
                continue;
            }
            let envelope = Envelope {
                selector: selector.map(str::to_string),
                payload: payload.clone(),
            };
            if entry.value().sender.send(envelope).is_ok() {
                delivered += 1;
            } else {
                dead.push(entry.key().clone());
            }
        }

        for connection_id in dead {
            self.disconnect(&connection_id);
        }

        delivered
    }
}

#[async_trait]
impl ServerEvents for ServerEventsHub {
    fn find_subscription(&self, connection_id: &str) -> Option<Subscription> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.subscription.clone())
    }

    fn find_subscriptions_by_user_id(&self, user_id: &str) -> Vec<Subscription> {
        self.connections
            .iter()
            .filter(|entry| entry.subscription.user_id == user_id)
            .map(|entry| entry.subscription.clone())
            .collect()
    }

    async fn notify_channel(&self, channel: &str, selector: Option<&str>, payload: Payload) {
        let count = self.deliver_where(|e| e.channels.contains(channel), selector, &payload);
        trace!(channel = %channel, recipients = count, "Notified channel");
    }

    async fn notify_user_id(&self, user_id: &str, selector: Option<&str>, payload: Payload) {
        let count = self.deliver_where(|e| e.subscription.user_id == user_id, selector, &payload);
        trace!(user = %user_id, recipients = count, "Notified user");
    }

    async fn notify_subscription(&self, connection_id: &str, selector: Option<&str>, payload: Payload) {
        let count = self.deliver_where(
            |e| e.subscription.connection_id == connection_id,
            selector,
            &payload,
        );
        trace!(connection = %connection_id, recipients = count, "Notified subscription");
    }

    fn reset_all(&self) {
        let count = self.connections.len();
        // Dropping the senders closes every connection's stream.
        self.connections.clear();
        debug!(connections = count, "Reset all server events state");
    }
}
