mod config;
mod routes;
mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use bloom_contracts::selections::SelectionJournal;
use bloom_engine::{AnalyticsClient, BloomEngine};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Cli;
use routes::create_router;
use state::{AppState, SharedState};

fn main() {
    if let Err(err) = run() {
        eprintln!("bloom-server error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bloom_server=info,bloom_engine=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.engine_settings();
    info!(
        resource_dir = %settings.resource_root.display(),
        baseline = %settings.baseline_pipeline,
        candidate = %settings.candidate_pipeline,
        mode = ?settings.selection_mode,
        "starting bloom-server"
    );

    // The catalog is fully loaded before the listener exists.
    let engine = match cli.seed {
        Some(seed) => {
            BloomEngine::bootstrap_with_rng(settings, Box::new(StdRng::seed_from_u64(seed)))
        }
        None => BloomEngine::bootstrap(settings),
    }
    .context("failed to load app catalog")?;

    let analytics = AnalyticsClient::new(cli.analytics_settings())?;
    let journal = cli.selection_log.clone().map(SelectionJournal::new);
    let state = AppState::shared(engine, analytics, journal);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(serve(cli.bind_addr(), state))
}

async fn serve(addr: SocketAddr, state: SharedState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
