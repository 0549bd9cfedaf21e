use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use shardscope::clock::WindowClock;
use shardscope::config::Config;
use shardscope::ingest;
use shardscope::publish::{LogPublisher, Publisher};
use shardscope::reader::MetricsReader;

/// Windowed shard-request metrics snapshot reader.
#[derive(Parser)]
#[command(name = "shardscope", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("shardscope {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting shardscope",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let ctx = tokio_util::sync::CancellationToken::new();

    // Set up signal handling.
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        signal_ctx.cancel();
    });

    let clock = WindowClock::new(cfg.metrics.sampling_interval)?;

    let mut reader = MetricsReader::new(cfg.metrics.clone(), clock.current_window_start());
    if cfg.publish.log {
        reader.add_publisher(Publisher::Log(LogPublisher::new()));
    }
    reader.start(ctx.clone()).await?;
    let reader = Arc::new(reader);

    // Window flips drive rollover.
    let rotation_reader = Arc::clone(&reader);
    clock.on_window_changed(Box::new(move |window_start| {
        rotation_reader.on_window_changed(window_start);
    }));
    clock.start();

    // Feed half-events from the configured source until it runs dry or
    // shutdown is requested.
    let ingest_reader = Arc::clone(&reader);
    let ingest_ctx = ctx.clone();
    let ingest_cfg = cfg.ingest.clone();
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = ingest::run(ingest_cfg, ingest_reader, ingest_ctx).await {
            tracing::error!(error = %e, "event ingest failed");
        }
    });

    ctx.cancelled().await;

    // Graceful shutdown: stop the clock, flush the last window, join ingest.
    clock.stop();
    reader.wait_for_shutdown().await;
    let _ = ingest_task.await;

    tracing::info!("shardscope stopped");

    Ok(())
}
