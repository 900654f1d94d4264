//! Terminal overlay: optionally start the enrichment job, then print each new
//! current-events feature once until the job reports complete.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulse::client::{FeatureLayer, HttpFeedSource, Overlay};
use pulse::feed::Feature;
use pulse::job::StartOutcome;
use pulse::PulseConfig;

#[derive(Parser, Debug)]
#[command(name = "pulse_watch", about = "Follow the current-events feed as it grows")]
struct Args {
    /// Base URL of the Pulse server.
    #[arg(long, env = "PULSE_URL", default_value = "http://127.0.0.1:8000")]
    url: String,
    /// Poll interval in seconds (defaults to `[client] poll_interval_secs`).
    #[arg(long)]
    interval: Option<u64>,
    /// Trigger `/api/run_job` before watching.
    #[arg(long)]
    start: bool,
}

struct PrintLayer;

impl FeatureLayer for PrintLayer {
    fn add(&mut self, feature: &Feature) {
        let p = &feature.properties;
        let coords = feature
            .geometry
            .as_ref()
            .and_then(|g| Some((g.lat()?, g.lon()?)))
            .map(|(lat, lon)| format!("{lat:.3},{lon:.3}"))
            .unwrap_or_else(|| "-".to_string());
        let title = if p.title.is_empty() { "(untitled)" } else { p.title.as_str() };
        let summary = Some(p.summary.as_str()).filter(|s| !s.is_empty());
        match p.llm_sentence.as_deref().or(summary) {
            Some(line) => println!("[{coords}] {title}: {line}"),
            None => println!("[{coords}] {title}"),
        }
    }

    fn clear(&mut self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    pulse::init_tracing();
    let args = Args::parse();

    if args.start {
        let url = format!("{}/api/run_job", args.url.trim_end_matches('/'));
        let outcome: StartOutcome = reqwest::Client::new().post(url).send().await?.json().await?;
        println!("job: {}", serde_json::to_string(&outcome)?);
        if outcome.is_error() {
            anyhow::bail!("job did not start");
        }
    }

    let source = Arc::new(HttpFeedSource::new(args.url));
    let interval = match args.interval {
        Some(secs) => Duration::from_secs(secs.max(1)),
        None => PulseConfig::load_default()?.client.poll_interval(),
    };
    let mut overlay = Overlay::new(source, PrintLayer, interval);
    overlay.activate();

    let finished = tokio::select! {
        _ = overlay.wait_finished() => true,
        _ = tokio::signal::ctrl_c() => false,
    };
    if finished {
        println!("job complete ({} features)", overlay.seen_count());
    } else {
        overlay.deactivate();
    }
    Ok(())
}
