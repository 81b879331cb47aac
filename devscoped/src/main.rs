mod replay;

use anyhow::{Context, Result};
use clap::Parser;
use devscope_core::{api::ApiServer, config::Config, DebugSession};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devscoped", about = "DevScope debugging session daemon")]
struct Args {
    /// Путь к конфигу (без него используются значения по умолчанию)
    #[arg(short, long)]
    config: Option<String>,

    /// JSONL-журнал событий для воспроизведения при старте
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Адрес HTTP API; включает API независимо от конфига
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Выйти после воспроизведения, не дожидаясь Ctrl-C
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    tracing::info!("Starting DevScope session daemon");

    let session = Arc::new(DebugSession::new(&config));
    session
        .start(None)
        .context("Failed to start debugging session")?;

    if let Some(path) = &args.replay {
        replay::replay_file(&session, path).await?;
    }

    let listen = match args.listen {
        Some(addr) => Some(addr),
        None if config.api.enabled => Some(
            config
                .api
                .listen_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid api.listen_addr {}", config.api.listen_addr))?,
        ),
        None => None,
    };

    let server = match listen {
        Some(addr) if !args.once => Some(ApiServer::new(addr, Arc::clone(&session)).start().await?),
        _ => None,
    };

    if !args.once {
        signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received SIGINT, shutting down");
    }

    if let Some(handle) = server {
        handle.shutdown().await?;
    }

    let stats = session.stats();
    session.destroy();
    stats.log_stats();
    Ok(())
}
