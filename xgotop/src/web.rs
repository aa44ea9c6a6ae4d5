//! # Web API
//!
//! `--web` serves recorded sessions and the live event stream over HTTP.
//!
//! | Route | Returns |
//! |-------|---------|
//! | `GET /api/sessions` | every session's metadata, oldest first |
//! | `GET /api/sessions/:id` | one session's metadata |
//! | `GET /api/sessions/:id/events` | events; `goroutine`, `event_type`, `start_time`, `end_time`, `limit`, `offset` |
//! | `GET /api/sessions/:id/goroutines` | distinct goroutine ids |
//! | `GET`/`POST /api/config` | timeline display settings |
//! | `GET /api/metrics` | latest pipeline sample |
//! | `GET /ws` | live events, one JSON text frame each |
//!
//! Every response carries permissive CORS headers so a browser UI on another
//! origin can use it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use xgotop_common::{EventType, GoRuntimeEvent};

use crate::domain::StorageError;
use crate::profiling::metrics::MetricSample;
use crate::storage::{EventFilter, JsonEvent, Session, SessionManager};

/// Events buffered per live subscriber before it starts missing some
pub const LIVE_STREAM_CAPACITY: usize = 4096;

/// Display settings shared with the browser timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    pub nanoseconds_per_pixel: f64,
    /// Goroutine status number to CSS color
    pub state_colors: BTreeMap<String, String>,
    /// Allocation event name to CSS color
    pub type_colors: BTreeMap<String, String>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        let colors = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
        };
        Self {
            nanoseconds_per_pixel: 1_000_000.0,
            state_colors: colors(&[
                ("0", "#22c55e"),
                ("1", "#3b82f6"),
                ("2", "#eab308"),
                ("3", "#f97316"),
                ("4", "#ef4444"),
                ("5", "#a855f7"),
                ("6", "#64748b"),
                ("7", "#ec4899"),
                ("8", "#14b8a6"),
                ("9", "#f59e0b"),
            ]),
            type_colors: colors(&[
                ("makeslice", "#3b82f6"),
                ("makemap", "#8b5cf6"),
                ("newobject", "#06b6d4"),
            ]),
        }
    }
}

/// Everything the handlers share
pub struct WebState {
    manager: SessionManager,
    config: RwLock<TimelineConfig>,
    metrics: RwLock<MetricSample>,
    live: broadcast::Sender<GoRuntimeEvent>,
}

impl WebState {
    /// `live` is the sender the processing workers publish to
    #[must_use]
    pub fn new(manager: SessionManager, live: broadcast::Sender<GoRuntimeEvent>) -> Self {
        Self {
            manager,
            config: RwLock::new(TimelineConfig::default()),
            metrics: RwLock::new(MetricSample::default()),
            live,
        }
    }

    pub fn publish_metrics(&self, sample: MetricSample) {
        *self.metrics.write().unwrap_or_else(PoisonError::into_inner) = sample;
    }
}

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::SessionNotFound(_) | StorageError::NoEventStore(_) => {
                Self::NotFound(e.to_string())
            }
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, message).into_response()
    }
}

/// Session stores do file I/O, so keep them off the async workers
async fn with_manager<T, F>(state: &Arc<WebState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&SessionManager) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.manager))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

#[derive(Debug, Default, Deserialize)]
struct EventQuery {
    goroutine: Option<u64>,
    /// Discriminant or short name (`makemap`)
    event_type: Option<String>,
    start_time: Option<u64>,
    end_time: Option<u64>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl EventQuery {
    fn into_filter(self) -> Result<EventFilter, ApiError> {
        let event_type = self
            .event_type
            .map(|raw| {
                raw.parse::<u32>()
                    .ok()
                    .and_then(EventType::from_raw)
                    .or_else(|| EventType::from_name(&raw))
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown event type: {raw}")))
            })
            .transpose()?;

        Ok(EventFilter {
            goroutine: self.goroutine,
            event_type,
            start_ns: self.start_time,
            end_ns: self.end_time,
            offset: self.offset.unwrap_or(0),
            limit: self.limit.unwrap_or(0),
        })
    }
}

async fn list_sessions(State(state): State<Arc<WebState>>) -> Result<Json<Vec<Session>>, ApiError> {
    with_manager(&state, SessionManager::list).await.map(Json)
}

async fn get_session(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    with_manager(&state, move |m| m.get(&id)).await.map(Json)
}

async fn get_events(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<JsonEvent>>, ApiError> {
    let filter = query.into_filter()?;
    let events = with_manager(&state, move |m| m.open(&id)?.read_events(&filter)).await?;
    Ok(Json(events.iter().map(JsonEvent::from).collect()))
}

async fn get_goroutines(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<u64>>, ApiError> {
    with_manager(&state, move |m| m.open(&id)?.goroutines()).await.map(Json)
}

async fn get_config(State(state): State<Arc<WebState>>) -> Json<TimelineConfig> {
    Json(state.config.read().unwrap_or_else(PoisonError::into_inner).clone())
}

async fn set_config(
    State(state): State<Arc<WebState>>,
    Json(config): Json<TimelineConfig>,
) -> Json<TimelineConfig> {
    *state.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
    Json(config)
}

async fn get_metrics(State(state): State<Arc<WebState>>) -> Json<MetricSample> {
    Json(*state.metrics.read().unwrap_or_else(PoisonError::into_inner))
}

async fn live_stream(State(state): State<Arc<WebState>>, ws: WebSocketUpgrade) -> Response {
    let events = state.live.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, events))
}

async fn stream_events(mut socket: WebSocket, mut events: broadcast::Receiver<GoRuntimeEvent>) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&JsonEvent::from(&event)) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Live client fell behind, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

pub fn router(state: Arc<WebState>) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/events", get(get_events))
        .route("/api/sessions/:id/goroutines", get(get_goroutines))
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/metrics", get(get_metrics))
        .route("/ws", get(live_stream))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// # Errors
/// Accept loop I/O failures
pub async fn serve(
    listener: TcpListener,
    state: Arc<WebState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}
