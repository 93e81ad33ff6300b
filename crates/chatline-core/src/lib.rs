//! # chatline-core
//!
//! Message routing and chat history for the Chatline chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ChatRouter** - Validates senders, classifies targets, fans out
//! - **HistoryStore** - Per-channel ordered message logs with paging
//! - **ServerEvents** - The transport seam the router delivers through
//! - **ChatMessage** - Message and post types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  ChatPost   │────▶│ ChatRouter  │────▶│ ServerEvents │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │ HistoryStore │
//!                     └──────────────┘
//! ```
//!
//! Public broadcast messages are fanned out to every channel subscriber
//! and appended to that channel's history log. Private messages go to a
//! single user, with a feedback copy relayed back to the sender's own
//! connections, and are never logged.

pub mod events;
pub mod history;
pub mod message;
pub mod router;

pub use events::{Payload, ServerEvents, Subscription};
pub use history::{HistoryStore, DEFAULT_HISTORY_LIMIT};
pub use message::{ChatMessage, ChatPost, MessageId, RawPost, Target};
pub use router::{ChatRouter, RouterConfig, RouterError};
