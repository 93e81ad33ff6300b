//! In-memory chat history for Chatline.
//!
//! `HistoryStore` owns the per-channel message logs and the id sequence.
//! Logs are created lazily on first append and live for the process
//! lifetime (or until an explicit flush). Retention is the host's concern.

use crate::message::{ChatMessage, MessageId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, trace};

/// Default number of messages returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Per-channel append log with sequence assignment and windowed retrieval.
///
/// Safe under concurrent callers: the id counter is atomic and each
/// channel's log is guarded by its map entry.
pub struct HistoryStore {
    /// Channel logs, each kept in ascending id order.
    logs: DashMap<String, Vec<ChatMessage>>,
    /// Global id sequence. Never reset, so ids are never reissued
    /// even across a flush.
    next_id: AtomicI64,
    /// Limit applied when a query does not specify one.
    default_limit: usize,
}

impl HistoryStore {
    /// Create a new history store with the default query limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a new history store with a custom default query limit.
    #[must_use]
    pub fn with_limit(default_limit: usize) -> Self {
        Self {
            logs: DashMap::new(),
            next_id: AtomicI64::new(0),
            default_limit,
        }
    }

    /// Issue an id strictly greater than any previously issued id.
    ///
    /// A single global sequence: per-channel ids are monotonic but not
    /// dense, which is all the log ordering requires.
    pub fn next_id(&self, channel: &str) -> MessageId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(channel = %channel, id, "Issued message id");
        id
    }

    /// Append a message to a channel's log, assigning an id if unset.
    ///
    /// The log stays ordered by id even when callers obtained their ids
    /// before appending concurrently: insertion position is found under
    /// the entry lock.
    pub fn append(&self, channel: &str, mut msg: ChatMessage) {
        let mut log = self.logs.entry(channel.to_string()).or_default();

        if msg.id == 0 {
            msg.id = self.next_id(channel);
        }

        match log.last() {
            Some(last) if last.id > msg.id => {
                let idx = log.partition_point(|m| m.id < msg.id);
                log.insert(idx, msg);
            }
            _ => log.push(msg),
        }

        trace!(channel = %channel, len = log.len(), "Appended message");
    }

    /// Get the newest messages in a channel with `id > after_id`.
    ///
    /// Returns at most `take` messages (default limit when `None`),
    /// always the newest qualifying window, in ascending id order.
    /// A channel with no log yields an empty vec.
    #[must_use]
    pub fn query(
        &self,
        channel: &str,
        after_id: Option<MessageId>,
        take: Option<usize>,
    ) -> Vec<ChatMessage> {
        let Some(log) = self.logs.get(channel) else {
            return Vec::new();
        };

        let after_id = after_id.unwrap_or(0);
        let take = take.unwrap_or(self.default_limit);

        // Log is sorted by id, so the filter is a partition point.
        let start = log.partition_point(|m| m.id <= after_id);
        let range = &log[start..];
        let skip = range.len().saturating_sub(take);
        range[skip..].to_vec()
    }

    /// Query several channels and merge the results by ascending id.
    ///
    /// Channels are independent sequences; the merged order is numeric
    /// id order, not arrival order across channels.
    #[must_use]
    pub fn query_many(
        &self,
        channels: &[String],
        after_id: Option<MessageId>,
        take: Option<usize>,
    ) -> Vec<ChatMessage> {
        let mut results: Vec<ChatMessage> = channels
            .iter()
            .flat_map(|c| self.query(c, after_id, take))
            .collect();
        results.sort_by_key(|m| m.id);
        results
    }

    /// Discard all channel logs. The id sequence is not reset, so a
    /// client that cached ids before the flush never sees a reissue.
    pub fn flush(&self) {
        let channels = self.logs.len();
        self.logs.clear();
        debug!(channels, "Flushed chat history");
    }

    /// Total number of logged messages across all channels.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.logs.iter().map(|log| log.len()).sum()
    }

    /// Number of channels with a log.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.logs.len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn msg(id: MessageId, channel: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id,
            channel: channel.to_string(),
            from_user_id: "u1".to_string(),
            from_display_name: "Alice".to_string(),
            body: body.to_string(),
            private: false,
        }
    }

    #[test]
    fn test_next_id_monotonic() {
        let store = HistoryStore::new();
        let a = store.next_id("general");
        let b = store.next_id("general");
        let c = store.next_id("other");
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn test_append_assigns_id_when_unset() {
        let store = HistoryStore::new();
        store.append("general", msg(0, "general", "first"));
        store.append("general", msg(0, "general", "second"));

        let log = store.query("general", None, None);
        assert_eq!(log.len(), 2);
        assert!(log[0].id > 0);
        assert!(log[1].id > log[0].id);
        assert_eq!(log[0].body, "first");
    }

    #[test]
    fn test_append_keeps_log_ordered() {
        let store = HistoryStore::new();
        // Ids issued in order but appended out of order.
        let a = store.next_id("general");
        let b = store.next_id("general");
        store.append("general", msg(b, "general", "late"));
        store.append("general", msg(a, "general", "early"));

        let log = store.query("general", None, None);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].body, "early");
        assert_eq!(log[1].body, "late");
    }

    #[test]
    fn test_query_unknown_channel_is_empty() {
        let store = HistoryStore::new();
        assert!(store.query("nowhere", None, None).is_empty());
    }

    #[test]
    fn test_query_returns_all_when_under_limit() {
        let store = HistoryStore::new();
        for i in 0..5 {
            store.append("general", msg(0, "general", &format!("m{i}")));
        }

        let log = store.query("general", Some(0), Some(100));
        assert_eq!(log.len(), 5);
        assert_eq!(log[0].body, "m0");
        assert_eq!(log[4].body, "m4");
    }

    #[test]
    fn test_query_takes_newest_window_in_ascending_order() {
        let store = HistoryStore::new();
        for i in 0..10 {
            store.append("general", msg(0, "general", &format!("m{i}")));
        }

        let log = store.query("general", Some(0), Some(3));
        assert_eq!(log.len(), 3);
        // Newest three, oldest-first among them.
        assert_eq!(log[0].body, "m7");
        assert_eq!(log[2].body, "m9");
        assert!(log[0].id < log[1].id && log[1].id < log[2].id);
    }

    #[test]
    fn test_query_after_id_filters() {
        let store = HistoryStore::new();
        for i in 0..5 {
            store.append("general", msg(0, "general", &format!("m{i}")));
        }
        let log = store.query("general", None, None);
        let cutoff = log[2].id;

        let tail = store.query("general", Some(cutoff), None);
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|m| m.id > cutoff));
        assert_eq!(tail[0].body, "m3");
    }

    #[test]
    fn test_query_many_merges_by_id() {
        let store = HistoryStore::new();
        store.append("a", msg(0, "a", "a0"));
        store.append("b", msg(0, "b", "b0"));
        store.append("a", msg(0, "a", "a1"));

        let merged = store.query_many(
            &["a".to_string(), "b".to_string(), "missing".to_string()],
            None,
            None,
        );
        assert_eq!(merged.len(), 3);
        assert!(merged.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(merged[0].body, "a0");
        assert_eq!(merged[1].body, "b0");
        assert_eq!(merged[2].body, "a1");
    }

    #[test]
    fn test_flush_clears_logs_but_not_sequence() {
        let store = HistoryStore::new();
        store.append("general", msg(0, "general", "before"));
        let before = store.query("general", None, None)[0].id;

        store.flush();
        assert!(store.query("general", None, None).is_empty());
        assert_eq!(store.message_count(), 0);

        // Sequence keeps climbing past the flushed ids.
        assert!(store.next_id("general") > before);
    }

    #[test]
    fn test_concurrent_appends_stay_ordered() {
        let store = Arc::new(HistoryStore::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    store.append("general", msg(0, "general", "x"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let log = store.query("general", Some(0), Some(1000));
        assert_eq!(log.len(), 800);
        assert!(log.windows(2).all(|w| w[0].id < w[1].id));
    }
}
