use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt};

use market_rounds::config::AppConfig;
use market_rounds::directory::{CompanyDirectory, RestDirectory, StaticDirectory};
use market_rounds::journal::{LogJournal, RestJournal, TradeJournal};
use market_rounds::room::GameRules;
use market_rounds::server::{GameHub, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,market_rounds=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("🦀 Market Rounds starting...");

    // 2. Config
    let config = match std::env::var("MARKET_ROUNDS_CONFIG") {
        Ok(path) => AppConfig::load(Path::new(&path))?,
        Err(_) => AppConfig::load_default(),
    }
    .with_env_overrides();

    // 3. Company listings, read once
    let directory: Box<dyn CompanyDirectory> = match &config.directory.url {
        Some(url) => Box::new(RestDirectory::new(url.clone())),
        None => Box::new(StaticDirectory::default()),
    };
    let listings = directory.companies().await?;
    tracing::info!("📇 {} companies from the {} directory", listings.len(), directory.name());

    let journal: Arc<dyn TradeJournal> = match &config.journal.url {
        Some(url) => Arc::new(RestJournal::new(url.clone())),
        None => Arc::new(LogJournal),
    };
    tracing::info!("📒 Trades journalled to {}", journal.name());

    // 4. Serve until Ctrl-C
    let hub = GameHub::new(GameRules::new(config.game.clone(), listings), journal);
    let listener = TcpListener::bind(config.server.listen).await?;

    tokio::select! {
        res = serve(listener, hub) => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("🛑 Shutting down"),
    }

    Ok(())
}
