//! Ask the inference service (through the relay or directly) and print the
//! answer as it streams in.

use std::io::Write;

use clap::Parser;
use pulse::client::{ask, stream_ask, ResultView, SessionState};
use pulse::relay::AskRequest;

#[derive(Parser, Debug)]
#[command(name = "pulse_ask", about = "Stream an answer from the Pulse inference relay")]
struct Args {
    /// Prompt text.
    prompt: String,
    /// Relay (`/api/ask_llm`) or inference service (`/ask`) URL.
    #[arg(long, env = "PULSE_ASK_URL", default_value = "http://127.0.0.1:8000/api/ask_llm")]
    url: String,
    #[arg(long)]
    system_prompt: Option<String>,
    /// Wait for the complete answer instead of streaming.
    #[arg(long)]
    no_stream: bool,
}

/// Writes only the newly appended part of the answer.
#[derive(Default)]
struct StdoutView {
    printed: usize,
}

impl ResultView for StdoutView {
    fn on_text(&mut self, accumulated: &str) {
        if let Some(delta) = accumulated.get(self.printed..) {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        self.printed = accumulated.len();
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("\n[error] {message}");
    }

    fn on_finish(&mut self, state: &SessionState) {
        println!();
        if let SessionState::Failed(f) = state {
            eprintln!("[failed] {f}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    pulse::init_tracing();
    let args = Args::parse();

    let mut req = AskRequest::new(args.prompt);
    req.system_prompt = args.system_prompt;
    let http = reqwest::Client::new();

    if args.no_stream {
        let answer = ask(&http, &args.url, &req).await?;
        println!("{answer}");
        return Ok(());
    }

    let (session, _view) = stream_ask(&http, &args.url, &req, StdoutView::default()).await;
    if let SessionState::Failed(f) = session.state() {
        anyhow::bail!("stream failed: {f}");
    }
    Ok(())
}
