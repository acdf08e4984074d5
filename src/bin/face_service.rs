use anyhow::Context as _;
use clap::Parser;
use foodgate::common::{Config, DevMode};
use foodgate::face::MockBackend;
use foodgate::service::face_server;
use std::path::PathBuf;
use std::sync::Arc;

/// Local stand-in for the face-recognition service. Matching is a
/// perceptual-hash simulation meant for development only.
#[derive(Parser, Debug)]
#[command(name = "foodgate-face-service")]
#[command(about = "Mock face-recognition service (detect/register/verify)")]
struct Args {
    #[arg(long)]
    dev: bool,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: String,

    /// Similarity needed for a match; defaults to [face] mock_match_threshold
    #[arg(long)]
    threshold: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.dev { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    let threshold = args.threshold.unwrap_or(config.face.mock_match_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        anyhow::bail!("Threshold must be between 0.0 and 1.0, got {}", threshold);
    }

    let dev_mode = DevMode::new(args.dev)?;
    let table = config
        .face
        .mock_references
        .clone()
        .unwrap_or_else(|| dev_mode.face_references_path());
    let backend = Arc::new(MockBackend::open(threshold, table)?);
    face_server::serve(&args.bind, backend, config.server.max_upload_bytes).await
}
