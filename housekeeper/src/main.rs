//! Housekeeper - log sweeper and rename watcher.
//!
//! # Commands
//!
//! - `housekeeper watch`: Watch the configured roots and mail every rename
//! - `housekeeper sweep`: Reclaim oversized files in the log directory once
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use housekeeper::config::Config;
use housekeeper::daemon;
use housekeeper::mailer::SmtpMailer;
use housekeeper::sweep::{notify_sweep, SizeSweep};
use housekeeper::watcher::NotifySource;

/// Housekeeper - log sweeper and rename watcher.
///
/// Reclaims oversized log files and reports renamed files by mail.
#[derive(Parser, Debug)]
#[command(name = "housekeeper")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    HOUSEKEEPER_FROM_ADDRESS            Sender address (required)
    HOUSEKEEPER_TO_ADDRESS              Recipient address (required)
    HOUSEKEEPER_SMTP_PASSWORD           SMTP password (required)
    HOUSEKEEPER_SMTP_USERNAME           SMTP login (default: from address)
    HOUSEKEEPER_SMTP_SERVER             SMTP relay host:port (default: smtp.gmail.com:587)
    HOUSEKEEPER_LOG_DIR                 Directory to sweep (default: /var/log/)
    HOUSEKEEPER_SIZE_THRESHOLD_BYTES    Sweep threshold (default: 1000000000)
    HOUSEKEEPER_WATCHED_ROOTS           Comma-separated roots to watch
    HOUSEKEEPER_QUEUE_CAPACITY          Event queue capacity (default: 8192)
    HOUSEKEEPER_BIND_RETRY_INTERVAL_MS  Delay between bind attempts (default: 1000)
    HOUSEKEEPER_BIND_MAX_ATTEMPTS       Initial bind attempts before giving up (default: 1)
    HOUSEKEEPER_REBIND_MAX_ATTEMPTS     Failed rebinds after a watch broke (default: unlimited)
    HOUSEKEEPER_ISOLATE_ROOTS           Keep other roots running when one fails (default: false)

EXAMPLES:
    # Watch two report directories
    export HOUSEKEEPER_WATCHED_ROOTS=/srv/reports,/srv/common
    housekeeper watch

    # Reclaim log files over 500 MB in a custom directory
    housekeeper sweep --dir /srv/logs --threshold 500000000
")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the configured roots for renames and mail each one.
    ///
    /// Runs until SIGINT/SIGTERM or a fatal error.
    Watch,

    /// Reclaim oversized files in the log directory once.
    Sweep {
        /// Directory to sweep (overrides HOUSEKEEPER_LOG_DIR).
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Size threshold in bytes (overrides HOUSEKEEPER_SIZE_THRESHOLD_BYTES).
        #[arg(short, long)]
        threshold: Option<u64>,

        /// Print the sweep report as JSON instead of the outcome line.
        #[arg(long)]
        report_json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs);

    let config = Config::from_env().context("Failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Command::Watch => runtime.block_on(run_watch(config)),
        Command::Sweep {
            dir,
            threshold,
            report_json,
        } => runtime.block_on(run_sweep(config, dir, threshold, report_json)),
    }
}

/// Runs the monitoring daemon.
async fn run_watch(config: Config) -> Result<()> {
    info!(
        roots = ?config.watched_roots,
        to = %config.mail.to_address,
        smtp_server = %config.mail.smtp_server,
        "Starting housekeeper daemon"
    );

    let mailer = SmtpMailer::from_config(&config.mail).context("Failed to set up SMTP transport")?;

    daemon::run_with_config(&config, Arc::new(NotifySource), mailer, wait_for_shutdown())
        .await
        .context("Daemon stopped with a fatal error")?;

    info!("Daemon stopped");
    Ok(())
}

/// Runs one sweep and sends its summary mail.
async fn run_sweep(
    config: Config,
    dir: Option<PathBuf>,
    threshold: Option<u64>,
    report_json: bool,
) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.log_dir.clone());
    let threshold = threshold.unwrap_or(config.size_threshold_bytes);

    let mailer = SmtpMailer::from_config(&config.mail).context("Failed to set up SMTP transport")?;

    let sweep = SizeSweep::new(dir.clone(), threshold);
    let report = tokio::task::spawn_blocking(move || sweep.run())
        .await
        .context("Sweep task failed")?
        .with_context(|| format!("Failed to sweep {}", dir.display()))?;

    notify_sweep(
        &report,
        &mailer,
        &config.mail.from_address,
        &config.mail.to_address,
    )
    .await
    .context("Failed to send sweep notification")?;

    if report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_empty() {
        println!("No file has been deleted!");
    } else {
        println!("Done job!");
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
