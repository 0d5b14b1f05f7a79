mod http;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autohide_core::{Command, MemoryScene, Orchestrator};
use autohide_proto::config::Config;
use autohide_proto::platform;
use clap::Parser;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::http::HttpState;
use crate::status::StatusBoard;

#[derive(Parser, Debug)]
#[command(name = "autohide", version, about = "Hide scene layers while Holyrics shows a Bible verse")]
struct Args {
    /// Config file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start monitoring immediately
    #[arg(long)]
    activate: bool,

    /// Control API bind address
    #[arg(long, default_value = platform::DEFAULT_API_HOST)]
    bind: String,

    /// Control API port
    #[arg(long, default_value_t = platform::DEFAULT_API_PORT)]
    port: u16,
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let log_path = platform::log_file();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {:?}", dir))?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {:?}", log_path))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,autohide_core=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let config_path = args.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path);
    info!("Config loaded from: {:?}", config_path);

    let monitor = config.monitor_config().normalized();

    // Stand-in host: the monitored scene with every configured layer visible.
    let scene_name = http::scene_name(&config);
    let scene = Arc::new(MemoryScene::with_scene(
        &scene_name,
        monitor.monitored_layers.iter().map(|l| (l.clone(), true)),
    ));

    let status = Arc::new(StatusBoard::new(
        monitor.monitored_layers.clone(),
        config.behavior.show_notifications,
    ));

    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    let orchestrator = Orchestrator::new(monitor, scene.clone(), status.clone())
        .context("building the Holyrics HTTP client")?;
    let engine = tokio::spawn(orchestrator.run(command_rx));

    let auto_activate = args.activate || config.plugin.auto_activate;
    let config = Arc::new(RwLock::new(config));

    let _http_handle = http::start_server(
        args.bind,
        args.port,
        HttpState {
            commands: command_tx.clone(),
            status,
            config: config.clone(),
            config_path: config_path.clone(),
            scene,
        },
    );

    if auto_activate {
        let (reply, rx) = oneshot::channel();
        command_tx
            .send(Command::Activate { reply })
            .await
            .context("orchestrator stopped before activation")?;
        match rx.await {
            Ok(Ok(())) => info!("Monitoring activated at startup"),
            Ok(Err(e)) => warn!("Auto-activation skipped: {}", e),
            Err(_) => warn!("Orchestrator dropped the activation request"),
        }
    }

    info!("Daemon initialised, waiting for Ctrl-C");
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;

    info!("Shutdown requested");
    let _ = command_tx.send(Command::Shutdown).await;
    if let Err(e) = engine.await {
        warn!("Orchestrator task ended abnormally: {}", e);
    }

    let config = config.read().await;
    config
        .save_to(&config_path)
        .with_context(|| format!("saving config to {:?}", config_path))?;
    info!("Config saved to {:?}", config_path);

    Ok(())
}
