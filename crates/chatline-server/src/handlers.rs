//! HTTP and SSE handlers for the Chatline server.
//!
//! The event stream endpoint registers live subscriptions in the hub;
//! the post endpoints feed the router, which fans back out through the
//! hub to the connected streams.

use crate::config::Config;
use crate::hub::{Envelope, ServerEventsHub};
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chatline_core::{
    ChatMessage, ChatPost, ChatRouter, HistoryStore, MessageId, Payload, RawPost, RouterConfig,
    RouterError, ServerEvents,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The chat message router.
    pub router: ChatRouter,
    /// Live connection registry.
    pub hub: Arc<ServerEventsHub>,
    /// Chat history store.
    pub history: Arc<HistoryStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(ServerEventsHub::new());
        let history = Arc::new(HistoryStore::with_limit(config.history.default_limit));
        let router = ChatRouter::with_config(
            Arc::clone(&hub) as Arc<dyn ServerEvents>,
            Arc::clone(&history),
            RouterConfig {
                require_auth_for_raw: config.auth.require_auth_for_raw,
            },
        );

        Self {
            router,
            hub,
            history,
            config,
        }
    }
}

/// Run the HTTP/SSE server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app_router(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Chatline server listening on {}", addr);
    info!("Event stream endpoint: http://{}/event-stream", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the route table.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/event-stream", get(event_stream))
        .route("/channels/:channel/chat", post(post_chat))
        .route("/channels/:channel/raw", post(post_raw))
        .route("/channels/:channel/object", post(post_object))
        .route("/chathistory", get(get_chat_history))
        .route("/reset", post(clear_history))
        .route("/reset-serverevents", post(reset_server_events))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Router errors mapped onto HTTP statuses.
struct ApiError(RouterError);

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            RouterError::SubscriptionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RouterError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            RouterError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        };
        metrics::record_error(kind);
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Query parameters for the event stream endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventStreamParams {
    /// Comma-separated channel list.
    channels: Option<String>,
    user_id: Option<String>,
    display_name: Option<String>,
}

/// Keeps the hub entry and connection gauges in sync with the SSE
/// stream's lifetime.
struct ConnectionGuard {
    hub: Arc<ServerEventsHub>,
    connection_id: String,
    _metrics: metrics::ConnectionMetricsGuard,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.disconnect(&self.connection_id);
        debug!(connection = %self.connection_id, "Event stream closed");
    }
}

/// SSE subscription endpoint.
///
/// Registers a live subscription for the requested channels and streams
/// notifications as SSE events named after their selector.
async fn event_stream(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let channels: Vec<String> = match params.channels.as_deref().filter(|c| !c.is_empty()) {
        Some(list) => list.split(',').map(str::to_string).collect(),
        None => state.config.events.default_channels.clone(),
    };
    // Identity comes from the query until a session layer fills it in.
    let display_name = params
        .display_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    let user_id = params
        .user_id
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| display_name.clone());

    let (subscription, rx) = state.hub.connect(user_id, display_name, channels);
    let guard = ConnectionGuard {
        hub: Arc::clone(&state.hub),
        connection_id: subscription.connection_id.clone(),
        _metrics: metrics::ConnectionMetricsGuard::new(),
    };

    let stream = futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let envelope = rx.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(envelope)), (rx, guard)))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(state.config.events.keep_alive_secs)),
    )
}

/// Convert a queued envelope into an SSE event. The selector becomes
/// the event name; the payload is JSON-serialized into the data field.
fn sse_event(envelope: Envelope) -> Event {
    let data = serde_json::to_string(&envelope.payload).unwrap_or_default();
    let event = Event::default().data(data);
    match envelope.selector {
        Some(selector) => event.event(selector),
        None => event,
    }
}

/// Post a chat message to a channel (or privately to a user).
async fn post_chat(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Json(mut post): Json<ChatPost>,
) -> Result<Json<ChatMessage>, ApiError> {
    // The route channel is authoritative.
    post.channel = Some(channel);

    let msg = state.router.post_chat(post).await?;
    metrics::record_message("chat", if msg.private { "direct" } else { "broadcast" });
    metrics::set_history_messages(state.history.message_count());

    Ok(Json(msg))
}

/// Post a raw control payload to a channel (or privately to a user).
async fn post_raw(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(mut post): Json<RawPost>,
) -> Result<StatusCode, ApiError> {
    post.channel = Some(channel);
    let target = if post.to_user_id.is_some() {
        "direct"
    } else {
        "broadcast"
    };

    let authenticated = is_authenticated(&state.config, &headers);
    state.router.post_raw(post, authenticated).await?;
    metrics::record_message("raw", target);

    Ok(StatusCode::NO_CONTENT)
}

/// An arbitrary JSON object to fan out.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectPost {
    to_user_id: Option<String>,
    selector: Option<String>,
    object: serde_json::Value,
}

/// Post a typed object to a channel or user. No sender validation:
/// object posts are server-to-client plumbing, not user chat.
async fn post_object(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Json(post): Json<ObjectPost>,
) -> StatusCode {
    let payload = Payload::Json(post.object);
    let selector = post.selector.as_deref();

    match post.to_user_id.as_deref().filter(|u| !u.is_empty()) {
        Some(user_id) => {
            state.hub.notify_user_id(user_id, selector, payload).await;
            metrics::record_message("object", "direct");
        }
        None => {
            state.hub.notify_channel(&channel, selector, payload).await;
            metrics::record_message("object", "broadcast");
        }
    }

    StatusCode::NO_CONTENT
}

/// Query parameters for the history endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    /// Comma-separated channel list.
    channels: Option<String>,
    after_id: Option<MessageId>,
    take: Option<usize>,
}

/// History response envelope.
#[derive(Debug, serde::Serialize)]
struct HistoryResponse {
    results: Vec<ChatMessage>,
}

/// Paged history for one or more channels, merged by ascending id.
async fn get_chat_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let channels: Vec<String> = params
        .channels
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let results = state
        .router
        .get_history(&channels, params.after_id, params.take);

    Json(HistoryResponse { results })
}

/// Discard all chat history.
async fn clear_history(State(state): State<Arc<AppState>>) -> StatusCode {
    state.router.clear_history();
    metrics::set_history_messages(0);
    StatusCode::NO_CONTENT
}

/// Drop all live subscriptions.
async fn reset_server_events(State(state): State<Arc<AppState>>) -> StatusCode {
    state.router.reset_events();
    StatusCode::NO_CONTENT
}

/// A caller is authenticated when it presents the configured bearer
/// token. With no token configured, nobody is.
fn is_authenticated(config: &Config, headers: &HeaderMap) -> bool {
    let Some(token) = config.auth.token.as_deref() else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {token}"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use axum::http::HeaderValue;

    fn test_state(config: Config) -> Arc<AppState> {
        Arc::new(AppState::new(config))
    }

    #[test]
    fn test_is_authenticated() {
        let mut config = Config::default();
        config.auth = AuthConfig {
            require_auth_for_raw: true,
            token: Some("secret".to_string()),
        };

        let mut headers = HeaderMap::new();
        assert!(!is_authenticated(&config, &headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(!is_authenticated(&config, &headers));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret"),
        );
        assert!(is_authenticated(&config, &headers));

        // No token configured: nothing authenticates.
        config.auth.token = None;
        assert!(!is_authenticated(&config, &headers));
    }

    #[test]
    fn test_sse_event_uses_selector_as_event_name() {
        // Event formatting is opaque, but building one must not panic
        // for any payload shape.
        let _named = sse_event(Envelope {
            selector: Some("cmd.chat".to_string()),
            payload: Payload::Raw("hello".to_string()),
        });
        let _unnamed = sse_event(Envelope {
            selector: None,
            payload: Payload::Json(serde_json::json!({"a": 1})),
        });
    }

    #[tokio::test]
    async fn test_post_chat_handler_roundtrip() {
        let state = test_state(Config::default());
        let (sub, mut rx) = state
            .hub
            .connect("alice", "Alice", vec!["general".to_string()]);
        // Drain the onConnect envelope.
        let _ = rx.try_recv();

        let post = ChatPost {
            from: sub.connection_id.clone(),
            message: "hello".to_string(),
            ..Default::default()
        };

        let Json(msg) = post_chat(
            State(Arc::clone(&state)),
            Path("general".to_string()),
            Json(post),
        )
        .await
        .map_err(|_| "post failed")
        .unwrap();

        assert_eq!(msg.channel, "general");
        assert_eq!(msg.from_display_name, "Alice");
        assert!(!msg.private);

        // The live subscriber got the fan-out.
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.payload, Payload::Chat(msg.clone()));

        // And history has it.
        let log = state.history.query("general", None, None);
        assert_eq!(log, vec![msg]);
    }

    #[tokio::test]
    async fn test_post_chat_unknown_sender_is_not_found() {
        let state = test_state(Config::default());

        let post = ChatPost {
            from: "ghost".to_string(),
            message: "hello".to_string(),
            ..Default::default()
        };

        let err = post_chat(State(state), Path("general".to_string()), Json(post))
            .await
            .err()
            .unwrap();
        assert!(matches!(err.0, RouterError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn test_post_raw_forbidden_without_token() {
        let mut config = Config::default();
        config.auth = AuthConfig {
            require_auth_for_raw: true,
            token: Some("secret".to_string()),
        };
        let state = test_state(config);
        let (sub, _rx) = state
            .hub
            .connect("alice", "Alice", vec!["general".to_string()]);

        let post = RawPost {
            from: sub.connection_id,
            message: "tv.watch abc".to_string(),
            ..Default::default()
        };

        let err = post_raw(
            State(state),
            Path("general".to_string()),
            HeaderMap::new(),
            Json(post),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err.0, RouterError::Forbidden));
    }

    #[tokio::test]
    async fn test_get_chat_history_handler() {
        let state = test_state(Config::default());
        let (sub, _rx) = state
            .hub
            .connect("alice", "Alice", vec!["general".to_string()]);

        let post = ChatPost {
            from: sub.connection_id,
            message: "hello".to_string(),
            ..Default::default()
        };
        post_chat(
            State(Arc::clone(&state)),
            Path("general".to_string()),
            Json(post),
        )
        .await
        .map_err(|_| "post failed")
        .unwrap();

        let Json(response) = get_chat_history(
            State(Arc::clone(&state)),
            Query(HistoryParams {
                channels: Some("general,random".to_string()),
                after_id: None,
                take: None,
            }),
        )
        .await;
        assert_eq!(response.results.len(), 1);

        let status = clear_history(State(Arc::clone(&state))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(response) = get_chat_history(
            State(state),
            Query(HistoryParams {
                channels: Some("general".to_string()),
                after_id: None,
                take: None,
            }),
        )
        .await;
        assert!(response.results.is_empty());
    }
}
