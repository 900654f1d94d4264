// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /api/current_events (placeholder, verbatim, corrupt)
// - GET /api/current_events_status (tracks the marker)
// - POST /api/run_job (spawn, stale artifact removal, spawn failure)
// - /api/ask_llm argument validation
// - /api/gibs_date

use std::path::Path;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tempfile::TempDir;
use tower::ServiceExt as _; // for `oneshot`

use pulse::{router, AppState, PulseConfig};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn test_config(dir: &Path) -> PulseConfig {
    let mut cfg = PulseConfig::default();
    cfg.feed.data_dir = dir.to_path_buf();
    // nothing listens here; every upstream call fails fast
    cfg.inference.base_url = "http://127.0.0.1:9".to_string();
    cfg.job.program = "definitely-not-a-real-program-pulse".to_string();
    cfg.job.args = vec![];
    cfg
}

fn test_router(cfg: &PulseConfig) -> Router {
    router(AppState::from_config(cfg))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let resp = app.clone().oneshot(req).await.expect("oneshot GET");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, headers, bytes)
}

async fn post(app: &Router, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build POST");
    let resp = app.clone().oneshot(req).await.expect("oneshot POST");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn json(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("valid json")
}

#[tokio::test]
async fn health_returns_ok() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_config(dir.path()));

    let (status, _, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "ok");
}

#[tokio::test]
async fn feed_before_any_run_is_empty_placeholder() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_config(dir.path()));

    let (status, headers, body) = get(&app, "/api/current_events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    let v = json(&body);
    assert_eq!(v["type"], "FeatureCollection");
    assert_eq!(v["features"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn feed_is_served_verbatim_and_corrupt_files_degrade() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let app = test_router(&cfg);

    let raw = r#"{"type":"FeatureCollection","features":[{"type":"Feature","id":"e1","geometry":{"type":"Point","coordinates":[2.35,48.85]},"properties":{"title":"Paris"}}]}"#;
    std::fs::write(cfg.feed.artifact_path(), raw).unwrap();
    let (_, _, body) = get(&app, "/api/current_events").await;
    assert_eq!(String::from_utf8(body).unwrap(), raw);

    // a partial write (job mid-flush) must never surface as a fault
    std::fs::write(cfg.feed.artifact_path(), r#"{"type":"FeatureCollection","feat"#).unwrap();
    let (status, _, body) = get(&app, "/api/current_events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["features"].as_array().unwrap().len(), 0);

    std::fs::write(cfg.feed.artifact_path(), "").unwrap();
    let (_, _, body) = get(&app, "/api/current_events").await;
    assert_eq!(json(&body)["features"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn status_tracks_marker_presence() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let app = test_router(&cfg);

    let (_, _, body) = get(&app, "/api/current_events_status").await;
    assert_eq!(json(&body), serde_json::json!({"running": false}));

    std::fs::write(cfg.feed.marker_path(), "1").unwrap();
    let (_, _, body) = get(&app, "/api/current_events_status").await;
    assert_eq!(json(&body), serde_json::json!({"running": true}));

    std::fs::remove_file(cfg.feed.marker_path()).unwrap();
    let (_, _, body) = get(&app, "/api/current_events_status").await;
    assert_eq!(json(&body), serde_json::json!({"running": false}));
}

#[tokio::test]
async fn run_job_spawn_failure_is_error_and_leaves_no_marker() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let app = test_router(&cfg);

    let (status, body) = post(&app, "/api/run_job", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let v = json(&body);
    assert_eq!(v["status"], "error");
    assert!(v["message"].as_str().unwrap().contains("failed to start job"));
    assert!(!cfg.feed.marker_path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn run_job_spawns_clears_stale_feed_and_completes() {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.job.program = "sh".to_string();
    cfg.job.args = vec![
        "-c".to_string(),
        concat!(
            "sleep 0.3; ",
            r#"printf '{"type":"FeatureCollection","features":[{"type":"Feature","id":"new","properties":{"title":"Fresh"}}]}' > "$PULSE_FEED_PATH"; "#,
            r#"rm -f "$PULSE_RUNNING_MARKER""#
        )
        .to_string(),
    ];
    let app = test_router(&cfg);

    std::fs::write(
        cfg.feed.artifact_path(),
        r#"{"type":"FeatureCollection","features":[{"type":"Feature","id":"old","properties":{}}]}"#,
    )
    .unwrap();

    let (status, body) = post(&app, "/api/run_job", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "started");

    // returned before the job finished: stale feed gone, marker present
    let (_, _, body) = get(&app, "/api/current_events").await;
    assert_eq!(json(&body)["features"].as_array().unwrap().len(), 0);
    let (_, _, body) = get(&app, "/api/current_events_status").await;
    assert_eq!(json(&body)["running"], true);

    let mut running = true;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (_, _, body) = get(&app, "/api/current_events_status").await;
        running = json(&body)["running"].as_bool().unwrap();
        if !running {
            break;
        }
    }
    assert!(!running, "job should clear its marker");

    let (_, _, body) = get(&app, "/api/current_events").await;
    let v = json(&body);
    assert_eq!(v["features"][0]["id"], "new");
}

#[tokio::test]
async fn run_job_accepts_get() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_config(dir.path()));

    let (status, _, body) = get(&app, "/api/run_job").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(&body)["status"], "error");
}

#[tokio::test]
async fn ask_without_prompt_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_config(dir.path()));

    let (status, body) = post(&app, "/api/ask_llm", r#"{"system_prompt":"be brief"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body).get("error").is_some());

    let (status, body) = post(&app, "/api/ask_llm", r#"{"prompt":"   "}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body).get("error").is_some());

    let (status, _, _) = get(&app, "/api/ask_llm").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ask_with_inference_down_is_service_unavailable() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_config(dir.path()));

    let (status, body) = post(&app, "/api/ask_llm", r#"{"prompt":"hello"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let v = json(&body);
    assert!(v["error"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn gibs_date_is_a_calendar_day() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_config(dir.path()));

    let (status, _, body) = get(&app, "/api/gibs_date").await;
    assert_eq!(status, StatusCode::OK);
    let date = json(&body)["date"].as_str().unwrap().to_string();
    assert!(chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_ok(), "{date}");
}

#[tokio::test]
async fn proxies_degrade_to_empty_results() {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.proxy.geosearch_url = "http://127.0.0.1:9/w/api.php".to_string();
    cfg.proxy.earthquakes_url = "http://127.0.0.1:9/quakes.geojson".to_string();
    cfg.proxy.news_rss_url = "http://127.0.0.1:9/rss".to_string();
    let app = test_router(&cfg);

    let (_, _, body) = get(&app, "/api/geo_lookup").await;
    assert_eq!(json(&body), serde_json::json!({"titles": []}));
    let (_, _, body) = get(&app, "/api/geo_lookup?lat=48.8&lon=2.3").await;
    assert_eq!(json(&body), serde_json::json!({"titles": []}));
    let (_, _, body) = get(&app, "/api/earthquakes").await;
    assert_eq!(json(&body), serde_json::json!({"features": []}));
    let (_, _, body) = get(&app, "/api/news_for_city?city=Paris").await;
    assert_eq!(json(&body), serde_json::json!([]));
    let (_, _, body) = get(&app, "/api/news_for_city").await;
    assert_eq!(json(&body), serde_json::json!([]));
}
