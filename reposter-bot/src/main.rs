//! reposter-bot - republish top Reddit posts to Instagram on a schedule

use clap::Parser;
use libreposter::logging::{LogFormat, LoggingConfig};
use libreposter::{Bot, Config, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reposter-bot")]
#[command(version)]
#[command(about = "Republish top Reddit posts to Instagram on a schedule")]
#[command(long_about = "\
reposter-bot - republish top Reddit posts to Instagram on a schedule

DESCRIPTION:
    Every fetch interval the bot takes the best new posts of each configured
    subreddit and queues them. Every upload interval it publishes a few
    queued image posts to Instagram, letterboxed to a square and credited to
    their author. Optionally it follows the posters of a hashtag and likes
    some of their recent posts.

USAGE:
    # Run in the foreground (logs to stderr)
    reposter-bot --config ~/.config/reposter/config.toml

    # One fetch and one upload, then exit
    reposter-bot --once

    # JSON logs for a log collector
    reposter-bot --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current cycle)

CONFIGURATION:
    Configuration file: ~/.config/reposter/config.toml
    Override with --config or REPOSTER_CONFIG.
    Credentials may come from IG_USERNAME, IG_PASSWORD, RD_USER_AGENT,
    RD_CLIENT_ID, RD_CLIENT_SECRET and RD_REFRESH_TOKEN.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
    2 - Authentication failed
    3 - Invalid input
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH", env = "REPOSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", env = "REPOSTER_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Authenticate, run one fetch and one upload, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    logging.format = cli.log_format;
    logging.verbose = cli.verbose;
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    info!("reposter-bot starting");
    let bot = Bot::connect(config).await?;

    if cli.once {
        let report = bot.run_once().await;
        info!(
            uploaded = report.uploaded,
            ignored = report.ignored,
            failed = report.failed,
            "Processed one cycle, exiting"
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone())?;

    bot.run(cancel).await;
    info!("reposter-bot stopped");
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            cancel.cancel();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            cancel.cancel();
        }
    });
    Ok(())
}
