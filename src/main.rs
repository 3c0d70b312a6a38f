//! # Field Datalogger
//!
//! Unattended sensor logging with a daily cellular upload window.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse the command line and load the TOML configuration
//!    - Set up logging (stdout, or a daily rolling file)
//!    - Build the modem, sensor, storage and upload components
//!
//! 2. **Main Loop**
//!    - Sample every second into `YYYYMMDD.csv`
//!    - At startup and after each UTC midnight: connect, upload, sync the
//!      clock, acquire a position, then power the modem back down
//!
//! 3. **Shutdown**
//!    - On Ctrl+C or SIGTERM, power the modem off before exiting
//!    - A fatal hardware error exits non-zero
//!
//! # Examples
//!
//! ```bash
//! field-datalogger --config /etc/datalogger/datalogger.toml --log-dir /var/log/datalogger
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use field_datalogger::config::{Config, LoggingConfig};
use field_datalogger::link::{CommandRunner, SerialLinkOpener, SystemRunner};
use field_datalogger::modem::{ConnectivityManager, SysfsGpioPower};
use field_datalogger::scheduler::{SamplingScheduler, SystemClock};
use field_datalogger::sensors::{IioAdc, SensorArray};
use field_datalogger::upload::{SftpRemote, UploadPipeline};

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "config/datalogger.toml";

#[derive(Debug, Parser)]
#[command(name = "field-datalogger", version, about = "Field data logger controller")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. The returned guard must be
/// held for the life of the process so buffered file logs get flushed.
fn init_logging(config: &LoggingConfig, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let dir = log_dir
        .map(Path::to_path_buf)
        .or_else(|| config.dir.as_ref().map(PathBuf::from));

    match dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn build_scheduler(config: Config) -> Result<SamplingScheduler> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    let modem = ConnectivityManager::new(
        &config.modem,
        &config.provider,
        runner.clone(),
        Box::new(SysfsGpioPower::new(&config.modem)),
        Box::new(SerialLinkOpener::new(config.serial.clone())),
    );

    let remote = SftpRemote::new(&config.remote, runner.clone());
    let pipeline = UploadPipeline::new(&config, Box::new(remote));

    let adc = IioAdc::new(&config.sensors.iio_root);
    let sensors = SensorArray::new(&config.sensors, Box::new(adc), Instant::now());

    let scheduler =
        SamplingScheduler::new(config, modem, pipeline, sensors, Arc::new(SystemClock), runner)
            .context("Failed to prepare data directories")?;
    Ok(scheduler)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let _log_guard = init_logging(&config.logging, cli.log_dir.as_deref());

    info!(
        "Field Datalogger v{} starting for site {}",
        env!("CARGO_PKG_VERSION"),
        config.site.name
    );

    let mut scheduler = build_scheduler(config)?;

    let outcome = tokio::select! {
        result = scheduler.run() => result,
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    scheduler.shutdown().await;

    if let Err(e) = &outcome {
        error!("Exiting after fatal error: {}", e);
    }
    outcome.context("Datalogger stopped")
}
