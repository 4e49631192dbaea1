/// Aria Server - voice-controlled local music for a smart speaker
use anyhow::Context;
use aria_index::{Indexer, IndexerConfig, IndexStore, Library};
use aria_server::{
    cli,
    config::AppConfig,
    device::{DeviceControl, ShellDevice},
    dispatcher::{self, EventDispatcher},
    gateway::{self, FileGateway},
    intent::IntentParser,
    orchestrator::{Orchestrator, OrchestratorSettings},
    probe::{DurationProbe, TrackProber},
};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "aria-server")]
#[command(about = "Voice-controlled local music playback for a smart speaker", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Serve,
    /// Refresh the music index once and exit
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Scan => scan(config).await,
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_library(config: &AppConfig) -> Library {
    let indexer = Indexer::new(IndexerConfig {
        extensions: config
            .supported_audio_extensions
            .iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect(),
        workers: aria_index::indexer::default_workers(),
    });
    Library::new(
        config.music_dirs.clone(),
        config.search.max_results,
        indexer,
        IndexStore::new(&config.search.index_file),
    )
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("starting aria server");

    // The probe is load-bearing; refuse to start without it.
    let probe: Arc<dyn DurationProbe> = Arc::new(TrackProber::new());
    probe.preflight().context("duration probe unavailable")?;

    let gateway = FileGateway::new(gateway::resolve_base_url(&config.http));
    let http_addr = format!("{}:{}", config.http.host, config.http.port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding file gateway to {http_addr}"))?;
    tracing::info!(addr = %http_addr, base_url = gateway.base_url(), "file gateway listening");
    let router = Arc::clone(&gateway).router();
    let http_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(http_listener, router).await {
            tracing::error!(%err, "file gateway terminated");
        }
    });

    let library = Arc::new(build_library(&config));
    let loaded = library.load_persisted();
    tracing::info!(loaded, "index cache loaded");

    let device: Arc<dyn DeviceControl> = Arc::new(ShellDevice::new(config.device.clone()));
    let orchestrator = Orchestrator::new(
        device,
        probe,
        Arc::clone(&library),
        Arc::clone(&gateway),
        IntentParser::new(&config.commands),
        OrchestratorSettings::from_config(&config),
    );

    if let Err(err) = orchestrator.refresh_index("startup").await {
        tracing::error!(%err, "startup index refresh failed");
    }

    let periodic_task = if config.search.refresh_interval_sec > 0.0 {
        Some(tokio::spawn(Arc::clone(&orchestrator).periodic_refresh()))
    } else {
        tracing::info!("periodic index refresh disabled");
        None
    };

    let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&orchestrator)));
    let event_listener = tokio::net::TcpListener::bind(&config.speaker.event_listen)
        .await
        .with_context(|| format!("binding event listener to {}", config.speaker.event_listen))?;
    tracing::info!(addr = %config.speaker.event_listen, "event listener ready");
    let event_task = tokio::spawn(dispatcher::serve_events(event_listener, dispatcher));

    if std::io::stdin().is_terminal() {
        cli::command_loop(Arc::clone(&orchestrator)).await;
    } else {
        tracing::info!("non-interactive mode, command loop disabled");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
    }

    tracing::info!("shutting down");
    event_task.abort();
    http_task.abort();
    if let Some(task) = periodic_task {
        task.abort();
    }
    Ok(())
}

async fn scan(config: AppConfig) -> anyhow::Result<()> {
    let library = build_library(&config);
    library.load_persisted();
    let total = library.refresh().await.context("refreshing music index")?;
    println!("indexed {total} songs");
    Ok(())
}
