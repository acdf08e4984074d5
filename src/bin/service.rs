use anyhow::Context as _;
use clap::Parser;
use foodgate::common::{Config, DevMode};
use foodgate::face::FaceAuthClient;
use foodgate::service::{server, AppState};
use foodgate::storage::open_store;
use foodgate::AuthService;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foodgate-service")]
#[command(about = "Foodgate authentication API")]
struct Args {
    /// Run in development mode (debug logging, data under ./dev_data)
    #[arg(long)]
    dev: bool,

    /// Config file (defaults to configs/foodgate.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from [server] bind
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.dev { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    tracing::info!("Starting foodgate service (dev_mode: {})", args.dev);

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let dev_mode = DevMode::new(args.dev)?;
    let store = open_store(&config.storage, &dev_mode)?;
    let face = FaceAuthClient::from_config(&config.face, &dev_mode)?;
    let auth = AuthService::from_config(&config.auth, store, face);

    server::serve(&config, AppState::new(auth)).await
}
