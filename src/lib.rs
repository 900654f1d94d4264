// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod client;
pub mod config;
pub mod feed;
pub mod job;
pub mod marker;
pub mod metrics;
pub mod proxy;
pub mod relay;

pub use crate::api::{router, AppState};
pub use crate::config::PulseConfig;

use axum::Router;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "PULSE_LOG_JSON";

/// Short, stable id for a prompt so logs never carry the raw text.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Install the global subscriber. `RUST_LOG` wins over the built-in filter;
/// `PULSE_LOG_JSON=1` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pulse=info,tower_http=warn"));
    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

/// Build the full router from an already loaded config.
pub fn app_from_config(cfg: &PulseConfig) -> anyhow::Result<Router> {
    let state = AppState::from_config(cfg);
    let mut app = router(state);
    if cfg.server.metrics {
        let m = crate::metrics::Metrics::init()?;
        app = app.merge(m.router());
    }
    info!(
        data_dir = %cfg.feed.data_dir.display(),
        inference = %cfg.inference.base_url,
        metrics = cfg.server.metrics,
        "router ready"
    );
    Ok(app)
}

/// Build the full router the binary serves, using `PulseConfig::load_default`.
pub fn app() -> anyhow::Result<Router> {
    let cfg = PulseConfig::load_default()?;
    app_from_config(&cfg)
}
