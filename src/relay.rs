// src/relay.rs
//! Inference Stream Relay: liveness probe, then forward a prompt to the local
//! inference service. The streaming path hands the upstream body back untouched.

use std::time::Duration;

use axum::body::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::InferenceSection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_params: Option<Map<String, Value>>,
}

impl AskRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            generation_params: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub response: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Liveness probe failed; nothing was forwarded.
    #[error("inference service unavailable: {0}")]
    Unavailable(String),
    /// Probe passed but the forwarded request failed at the transport level.
    #[error("inference request failed: {0}")]
    Upstream(String),
}

/// Successful relay results. Upstream HTTP status is passed along as-is.
pub enum Relayed {
    Complete {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    Stream(reqwest::Response),
}

#[derive(Clone)]
pub struct InferenceRelay {
    health_url: String,
    ask_url: String,
    probe_timeout: Duration,
    generate_timeout: Duration,
    http: reqwest::Client,
}

impl InferenceRelay {
    pub fn from_config(cfg: &InferenceSection) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("pulse-relay/0.1")
            .connect_timeout(cfg.probe_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "relay", error = %e, "http client build failed, connect timeout not applied");
                reqwest::Client::new()
            });
        Self {
            health_url: cfg.health_url(),
            ask_url: cfg.ask_url(),
            probe_timeout: cfg.probe_timeout(),
            generate_timeout: cfg.generate_timeout(),
            http,
        }
    }

    pub fn ask_url(&self) -> &str {
        &self.ask_url
    }

    /// Sub-second liveness check.
    pub async fn probe(&self) -> Result<(), RelayError> {
        let resp = self
            .http
            .get(&self.health_url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| RelayError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RelayError::Unavailable(format!(
                "health check returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn ask(&self, req: &AskRequest, stream: bool) -> Result<Relayed, RelayError> {
        let id = crate::anon_hash(&req.prompt);
        if let Err(e) = self.probe().await {
            warn!(target: "relay", %id, error = %e, "inference probe failed");
            counter!("relay_requests_total", "outcome" => "unavailable").increment(1);
            return Err(e);
        }

        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        debug!(target: "relay", %id, stream, "forwarding prompt");

        let builder = self
            .http
            .post(&self.ask_url)
            .header(reqwest::header::ACCEPT, accept)
            .json(req);

        // The generation timeout bounds the wait for response headers; a stream
        // that has started is left to run until the upstream closes it.
        let sent = tokio::time::timeout(self.generate_timeout, builder.send()).await;
        let resp = match sent {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!(target: "relay", %id, error = %e, "inference request failed");
                counter!("relay_requests_total", "outcome" => "upstream_error").increment(1);
                return Err(RelayError::Upstream(e.to_string()));
            }
            Err(_) => {
                warn!(target: "relay", %id, "inference request timed out");
                counter!("relay_requests_total", "outcome" => "upstream_error").increment(1);
                return Err(RelayError::Upstream("timed out waiting for response".to_string()));
            }
        };

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if stream && status.is_success() {
            info!(target: "relay", %id, "streaming inference response");
            counter!("relay_requests_total", "outcome" => "stream").increment(1);
            return Ok(Relayed::Stream(resp));
        }

        let body = tokio::time::timeout(self.generate_timeout, resp.bytes())
            .await
            .map_err(|_| RelayError::Upstream("timed out reading response".to_string()))?
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        info!(target: "relay", %id, status = status.as_u16(), len = body.len(), "inference response relayed");
        counter!("relay_requests_total", "outcome" => "complete").increment(1);
        Ok(Relayed::Complete {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
