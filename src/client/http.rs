//! HTTP side of the client: feed/status polling and prompt submission.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::warn;

use super::reconstruct::{ResultView, StreamFailure, StreamReconstructor, StreamSession};
use crate::feed::FeedSnapshot;
use crate::relay::{AskRequest, AskResponse};

/// Where the Incremental Consumer reads from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Full snapshot; an `Err` means "skip this poll".
    async fn read_feed(&self) -> Result<FeedSnapshot>;
    async fn read_status(&self) -> Result<bool>;
}

#[derive(Deserialize)]
struct StatusBody {
    running: bool,
}

/// Polls a running Pulse server.
#[derive(Clone)]
pub struct HttpFeedSource {
    base_url: String,
    http: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("pulse-client/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "client", error = %e, "http client build failed, feed polls have no timeout");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn cache_buster() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn read_feed(&self) -> Result<FeedSnapshot> {
        let resp = self
            .http
            .get(self.url("/api/current_events"))
            .query(&[("_", cache_buster())])
            .send()
            .await
            .context("feed request")?
            .error_for_status()
            .context("feed status")?;
        let bytes = resp.bytes().await.context("feed body")?;
        FeedSnapshot::parse(&bytes).ok_or_else(|| anyhow!("feed body is not a feature collection"))
    }

    async fn read_status(&self) -> Result<bool> {
        let body: StatusBody = self
            .http
            .get(self.url("/api/current_events_status"))
            .query(&[("_", cache_buster())])
            .send()
            .await
            .context("status request")?
            .error_for_status()
            .context("status status")?
            .json()
            .await
            .context("status body")?;
        Ok(body.running)
    }
}

/// Send a prompt and reconstruct the streamed answer as it arrives.
///
/// Works against the relay (`/api/ask_llm`) or directly against the inference
/// service (`/ask`). A JSON reply from an upstream that does not stream is
/// accepted as a single payload.
pub async fn stream_ask<V: ResultView>(
    http: &reqwest::Client,
    url: &str,
    req: &AskRequest,
    view: V,
) -> (StreamSession, V) {
    let mut rec = StreamReconstructor::new(view);

    let resp = match http
        .post(url)
        .query(&[("stream", "1")])
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(req)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            rec.fail(StreamFailure::Connect(e.to_string()));
            return rec.into_parts();
        }
    };

    if !resp.status().is_success() {
        rec.fail(StreamFailure::Status(resp.status().as_u16()));
        return rec.into_parts();
    }

    let is_json = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));
    if is_json {
        match resp.json::<AskResponse>().await {
            Ok(body) => {
                rec.push_payload(&body.response);
                rec.finish();
            }
            Err(e) => rec.fail(StreamFailure::Read(e.to_string())),
        }
        return rec.into_parts();
    }

    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                rec.push_bytes(&bytes);
                if rec.is_done() {
                    break;
                }
            }
            Err(e) => {
                rec.fail(StreamFailure::Read(e.to_string()));
                break;
            }
        }
    }
    rec.finish();
    rec.into_parts()
}

/// Non-streaming `Ask`: returns the `response` field.
pub async fn ask(
    http: &reqwest::Client,
    url: &str,
    req: &AskRequest,
) -> std::result::Result<String, StreamFailure> {
    let resp = http
        .post(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .json(req)
        .send()
        .await
        .map_err(|e| StreamFailure::Connect(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(StreamFailure::Status(resp.status().as_u16()));
    }
    let body: AskResponse = resp
        .json()
        .await
        .map_err(|e| StreamFailure::Read(e.to_string()))?;
    Ok(body.response)
}
