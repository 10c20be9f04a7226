//! Binary entrypoint: a timer-driven slideshow over a photo directory.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use photo_layer::config::Configuration;
use photo_layer::events::Advance;
use photo_layer::library::{self, Playlist};
use photo_layer::{tasks, viewer};

#[derive(Debug, Parser)]
#[command(name = "photo-layer", version, about = "GPU photo slideshow")]
struct Cli {
    /// Path to YAML config file
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Override the time each photo stays on screen (e.g. "5s")
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    dwell: Option<Duration>,

    /// Print the playlist order and exit without opening a window
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_layer={level}").parse()?)
        .add_directive("wgpu=warn".parse()?)
        .add_directive("winit=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    if let Some(dwell) = cli.dwell {
        cfg.dwell = dwell;
        cfg = cfg.validated().context("invalid --dwell")?;
    }
    info!(config = %cli.config.display(), ?cfg, "loaded configuration");

    let keys = library::scan(&cfg.photo_library_path, cfg.startup_shuffle_seed)
        .context("failed to scan photo library")?;

    if cli.dry_run {
        println!("# {} photos under {}", keys.len(), cfg.photo_library_path.display());
        for key in &keys {
            println!("{key}");
        }
        return Ok(());
    }

    let playlist = Playlist::new(keys);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let (advance_tx, advance_rx) = mpsc::channel::<Advance>(4);
    let mut tasks = JoinSet::new();
    tasks.spawn({
        let cancel = cancel.clone();
        let dwell = cfg.dwell;
        async move {
            tasks::slideshow::run(dwell, advance_tx, cancel)
                .await
                .context("slideshow task failed")
        }
    });

    // winit needs the main thread; this returns when the window closes or
    // cancellation fires
    if let Err(e) = viewer::run_windowed(cfg, playlist, advance_rx, cancel.clone())
        .context("viewer failed")
    {
        tracing::error!("{e:?}");
    }
    cancel.cancel();

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}
