use std::{net::SocketAddr, str::FromStr};

use clap::Parser;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{
    artifacts::{ArtifactOptions, ArtifactStore},
    pipeline::PipelineOptions,
    prelude::*,
    server::AppState,
};

mod artifacts;
mod assemble;
mod cpu_limit;
mod detect;
mod enhance;
mod error;
mod exec;
mod ocr;
mod pipeline;
mod prelude;
mod rasterize;
mod server;
mod staging;

/// Convert uploaded PDFs to text and DOCX, falling back to OCR for scans.
#[derive(Debug, Parser)]
#[clap(
    version,
    after_help = r#"
Environment Variables:
  - PORT (optional): Listen port, if --port is not given.
  - RUST_LOG (optional): Log filter, e.g. "textpress=debug".

  These variables may be set in a standard `.env` file.

External tools required on PATH: pdftotext, pdftocairo (poppler-utils)
and tesseract with the configured language data.
"#
)]
struct Opts {
    /// Port to listen on.
    #[clap(long, short, default_value_t = default_port())]
    port: u16,

    #[clap(flatten)]
    pipeline: PipelineOptions,

    #[clap(flatten)]
    artifacts: ArtifactOptions,
}

/// Honor the conventional `PORT` variable when no flag is given.
fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(3000)
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Make sure the staging area exists before the first upload arrives.
    std::fs::create_dir_all(&opts.pipeline.staging_dir).with_context(|| {
        format!(
            "failed to create staging directory {:?}",
            opts.pipeline.staging_dir.display()
        )
    })?;

    let artifacts = ArtifactStore::new(&opts.artifacts)?;
    let _sweeper = artifacts.spawn_sweeper();

    let state = AppState {
        pipeline: opts.pipeline,
        artifacts,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));
    server::serve(addr, state).await
}
