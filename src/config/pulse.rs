// src/config/pulse.rs
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

pub const DEFAULT_CONFIG_PATH: &str = "config/pulse.toml";
pub const ENV_CONFIG_PATH: &str = "PULSE_CONFIG_PATH";

const ENV_BIND: &str = "PULSE_BIND";
const ENV_DATA_DIR: &str = "PULSE_DATA_DIR";
const ENV_JOB_ENDPOINT: &str = "PULSE_JOB_ENDPOINT";
const ENV_INFERENCE_URL: &str = "INFERENCE_URL";
const ENV_METRICS: &str = "PULSE_METRICS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub server: ServerSection,
    pub feed: FeedSection,
    pub job: JobSection,
    pub inference: InferenceSection,
    pub proxy: ProxySection,
    pub client: ClientSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    /// Mount `/metrics` (Prometheus exposition).
    pub metrics: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            metrics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub data_dir: PathBuf,
    pub artifact: String,
    pub marker: String,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            artifact: "current_events.geojson".to_string(),
            marker: "current_events.running".to_string(),
        }
    }
}

impl FeedSection {
    pub fn artifact_path(&self) -> PathBuf {
        self.data_dir.join(&self.artifact)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(&self.marker)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSection {
    /// Local job-execution endpoint tried before spawning. `None` skips straight to spawn.
    pub endpoint: Option<String>,
    pub endpoint_timeout_ms: u64,
    pub program: String,
    /// `{out}` and `{marker}` are replaced with the artifact and marker paths.
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_timeout_ms: 2_000,
            program: "python3".to_string(),
            args: vec![
                "wikipedia.py".to_string(),
                "--out".to_string(),
                "{out}".to_string(),
            ],
            workdir: None,
        }
    }
}

impl JobSection {
    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    pub base_url: String,
    pub health_path: String,
    pub ask_path: String,
    pub probe_timeout_ms: u64,
    pub generate_timeout_secs: u64,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5005".to_string(),
            health_path: "/health".to_string(),
            ask_path: "/ask".to_string(),
            probe_timeout_ms: 800,
            generate_timeout_secs: 60,
        }
    }
}

impl InferenceSection {
    pub fn health_url(&self) -> String {
        join_url(&self.base_url, &self.health_path)
    }

    pub fn ask_url(&self) -> String {
        join_url(&self.base_url, &self.ask_path)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub geosearch_url: String,
    pub earthquakes_url: String,
    pub news_rss_url: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            user_agent: "Pulse/1.0".to_string(),
            timeout_secs: 5,
            geosearch_url: "https://en.wikipedia.org/w/api.php".to_string(),
            earthquakes_url:
                "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/all_month.geojson"
                    .to_string(),
            news_rss_url: "https://news.google.com/rss/search".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub poll_interval_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
        }
    }
}

impl ClientSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl PulseConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading pulse config from {}", path.display()))?;
        let cfg: PulseConfig = toml::from_str(&data)
            .with_context(|| format!("parsing pulse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Load config using env var + fallbacks:
    /// 1) $PULSE_CONFIG_PATH (must exist)
    /// 2) config/pulse.toml
    /// 3) built-in defaults
    ///
    /// Env overrides are applied last.
    pub fn load_default() -> anyhow::Result<Self> {
        let mut cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_CONFIG_PATH)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(v) = non_empty_env(ENV_BIND) {
            self.server.bind = v;
        }
        if let Some(v) = non_empty_env(ENV_DATA_DIR) {
            self.feed.data_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env(ENV_JOB_ENDPOINT) {
            self.job.endpoint = Some(v);
        }
        if let Some(v) = non_empty_env(ENV_INFERENCE_URL) {
            self.inference.base_url = v;
        }
        if let Some(v) = non_empty_env(ENV_METRICS) {
            self.server.metrics = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PulseConfig = toml::from_str(
            r#"
[feed]
data_dir = "/srv/pulse"

[inference]
base_url = "http://10.0.0.2:5005/"
"#,
        )
        .unwrap();
        assert_eq!(cfg.feed.artifact, "current_events.geojson");
        assert_eq!(
            cfg.feed.marker_path(),
            PathBuf::from("/srv/pulse/current_events.running")
        );
        assert_eq!(cfg.inference.ask_url(), "http://10.0.0.2:5005/ask");
        assert_eq!(cfg.inference.health_url(), "http://10.0.0.2:5005/health");
        assert_eq!(cfg.client.poll_interval(), Duration::from_secs(3));
        assert!(cfg.job.endpoint.is_none());
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_apply_after_file() {
        env::set_var(ENV_DATA_DIR, "/tmp/pulse-data");
        env::set_var(ENV_METRICS, "1");
        let mut cfg = PulseConfig::default();
        cfg.apply_env();
        env::remove_var(ENV_DATA_DIR);
        env::remove_var(ENV_METRICS);

        assert_eq!(cfg.feed.data_dir, PathBuf::from("/tmp/pulse-data"));
        assert!(cfg.server.metrics);
    }
}
