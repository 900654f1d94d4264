//! Pulse server binary.
//! Serves the job controller, feed/status endpoints, inference relay and the
//! thin proxies on one Axum router.

use anyhow::Context;
use tracing::info;

use pulse::{app_from_config, init_tracing, PulseConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PulseConfig::load_default()?;
    let app = app_from_config(&cfg)?;

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    info!(bind = %cfg.server.bind, "pulse listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server error")?;
    Ok(())
}
