use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{
        header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::config::PulseConfig;
use crate::feed::{FeedStore, EMPTY_FEED_JSON};
use crate::job::JobController;
use crate::marker::{FileMarker, RunMarker};
use crate::proxy::{self, Proxies};
use crate::relay::{AskRequest, InferenceRelay, RelayError, Relayed};

#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedStore>,
    pub jobs: Arc<JobController>,
    pub relay: Arc<InferenceRelay>,
    pub proxies: Arc<Proxies>,
}

impl AppState {
    /// Wire every component from config; the feed store and job controller share
    /// one file-backed run marker.
    pub fn from_config(cfg: &PulseConfig) -> Self {
        let marker: Arc<dyn RunMarker> = Arc::new(FileMarker::new(cfg.feed.marker_path()));
        Self {
            feed: Arc::new(FeedStore::new(cfg.feed.artifact_path(), Arc::clone(&marker))),
            jobs: Arc::new(JobController::from_config(&cfg.job, &cfg.feed, marker)),
            relay: Arc::new(InferenceRelay::from_config(&cfg.inference)),
            proxies: Arc::new(Proxies::from_config(&cfg.proxy)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/run_job", get(run_job).post(run_job))
        .route("/api/current_events", get(current_events))
        .route("/api/current_events_status", get(current_events_status))
        .route("/api/ask_llm", get(ask_llm_get).post(ask_llm_post))
        .route("/api/gibs_date", get(gibs_date))
        .route("/api/geo_lookup", get(geo_lookup))
        .route("/api/earthquakes", get(earthquakes))
        .route("/api/news_for_city", get(news_for_city))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn run_job(State(state): State<AppState>) -> Response {
    let outcome = state.jobs.start_job().await;
    let code = if outcome.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (code, Json(outcome)).into_response()
}

async fn current_events(State(state): State<AppState>) -> Response {
    let feed = Arc::clone(&state.feed);
    let bytes = tokio::task::spawn_blocking(move || feed.read_feed_bytes())
        .await
        .unwrap_or_else(|e| {
            warn!(target: "feed", error = %e, "feed read task failed");
            EMPTY_FEED_JSON.as_bytes().to_vec()
        });
    (
        [(CONTENT_TYPE, "application/json"), (CACHE_CONTROL, "no-store")],
        bytes,
    )
        .into_response()
}

async fn current_events_status(State(state): State<AppState>) -> Response {
    let running = state.feed.read_status();
    (
        [(CACHE_CONTROL, "no-store")],
        Json(json!({ "running": running })),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct AskQuery {
    prompt: Option<String>,
    system_prompt: Option<String>,
    stream: Option<String>,
}

fn wants_stream(q: &AskQuery, headers: &HeaderMap) -> bool {
    let by_query = q
        .stream
        .as_deref()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let by_accept = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));
    by_query || by_accept
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
}

async fn ask_llm_get(
    State(state): State<AppState>,
    Query(q): Query<AskQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(prompt) = q.prompt.clone().filter(|p| !p.trim().is_empty()) else {
        return bad_request("missing prompt");
    };
    let mut req = AskRequest::new(prompt);
    req.system_prompt = q.system_prompt.clone();
    let stream = wants_stream(&q, &headers);
    relay(&state, req, stream).await
}

async fn ask_llm_post(
    State(state): State<AppState>,
    Query(q): Query<AskQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = match serde_json::from_slice::<AskRequest>(&body) {
        Ok(r) if !r.prompt.trim().is_empty() => r,
        Ok(_) => return bad_request("missing prompt"),
        Err(e) => {
            debug!(target: "relay", error = %e, "unreadable ask body");
            return bad_request("missing prompt");
        }
    };
    let stream = wants_stream(&q, &headers);
    relay(&state, req, stream).await
}

async fn relay(state: &AppState, req: AskRequest, stream: bool) -> Response {
    match state.relay.ask(&req, stream).await {
        Ok(Relayed::Stream(resp)) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "text/event-stream"),
                (CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(resp.bytes_stream()),
        )
            .into_response(),
        Ok(Relayed::Complete {
            status,
            content_type,
            body,
        }) => {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let ct = content_type.unwrap_or_else(|| "application/json".to_string());
            (code, [(CONTENT_TYPE, ct)], body).into_response()
        }
        Err(RelayError::Unavailable(msg)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("inference service unavailable: {msg}") })),
        )
            .into_response(),
        Err(RelayError::Upstream(msg)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": msg })),
        )
            .into_response(),
    }
}

async fn gibs_date() -> Json<serde_json::Value> {
    Json(json!({ "date": proxy::gibs_date() }))
}

fn non_empty<'a>(q: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    q.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

async fn geo_lookup(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let titles = match (non_empty(&q, "lat"), non_empty(&q, "lon")) {
        (Some(lat), Some(lon)) => state.proxies.geo_lookup(lat, lon).await,
        _ => Vec::new(),
    };
    Json(json!({ "titles": titles }))
}

async fn earthquakes(State(state): State<AppState>) -> Response {
    match state.proxies.earthquakes().await {
        Some(bytes) => ([(CONTENT_TYPE, "application/json")], bytes).into_response(),
        None => Json(json!({ "features": [] })).into_response(),
    }
}

async fn news_for_city(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<proxy::NewsItem>> {
    match non_empty(&q, "city").or_else(|| non_empty(&q, "news_for_city")) {
        Some(city) => Json(state.proxies.news_for_city(city).await),
        None => Json(Vec::new()),
    }
}
